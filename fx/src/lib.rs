//! NostroVostro FX Rate Table
//!
//! Fixed conversion factors between settlement currencies.
//!
//! Rates are static configuration: the default table carries the six ordered
//! pairs among USD, AUD and EUR, and a table can be loaded from a JSON rate
//! file instead. There is no market-data feed, and `rate(A, B) * rate(B, A)`
//! is not 1 in general.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nostrovostro_fx::{FxEngine, RateTable};
//! use nostrovostro_common::{Currency, Money};
//!
//! let engine = FxEngine::new(Arc::new(RateTable::standard()));
//!
//! let rate = engine.rate(&Currency::usd(), &Currency::aud())?;
//! let conversion = engine.convert(&Money::new(dec!(1000), Currency::usd()), &Currency::aud())?;
//! ```

pub mod engine;
pub mod provider;
pub mod table;
pub mod conversion;
pub mod error;

pub use engine::FxEngine;
pub use provider::RateProvider;
pub use table::RateTable;
pub use conversion::Conversion;
pub use error::{FxError, FxResult};
