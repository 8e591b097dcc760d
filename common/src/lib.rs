//! NostroVostro Common Types
//!
//! Shared types for bilateral correspondent settlement: institution
//! identifiers, currencies and FX rates, institution records with their
//! nostro/vostro accounts, payment instructions and journaled transactions.

pub mod identifiers;
pub mod monetary;
pub mod institution;
pub mod transaction;
pub mod error;

pub use identifiers::*;
pub use monetary::*;
pub use institution::*;
pub use transaction::*;
pub use error::*;
