//! NostroVostro settlement service.
//!
//! Validates payment instructions against the bilateral account records of
//! correspondent banks, posts the vostro credit and nostro debit as one
//! settlement, and journals every validated instruction.

pub mod bootstrap;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod lock_manager;
pub mod metrics;
pub mod settlement_processor;
pub mod state;
pub mod validator;

pub use config::{CoordinatorConfig, SettlementConfig};
pub use coordinator::Coordinator;
pub use metrics::{Metrics, MetricsSnapshot};
pub use settlement_processor::SettlementProcessor;
pub use state::CoordinatorState;
pub use validator::TransactionValidator;
