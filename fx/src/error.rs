//! FX error types.

use nostrovostro_common::{CurrencyPair, SettleError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur in the FX rate table.
#[derive(Debug, Error)]
pub enum FxError {
    /// No factor configured for the requested pair.
    #[error("Unknown currency pair {0}")]
    UnknownCurrencyPair(CurrencyPair),

    /// A configured factor is unusable.
    #[error("Invalid rate for {pair}: {reason}")]
    InvalidRate { pair: CurrencyPair, reason: String },

    /// The converted amount does not fit in a decimal.
    #[error("Conversion overflow for {pair}: {value}")]
    Overflow { pair: CurrencyPair, value: Decimal },

    /// Rate file could not be read or parsed.
    #[error("Rate file error: {0}")]
    RateFile(String),
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

impl From<FxError> for SettleError {
    fn from(e: FxError) -> Self {
        match e {
            FxError::UnknownCurrencyPair(pair) => SettleError::UnknownCurrencyPair(pair),
            other => SettleError::ConfigurationError(other.to_string()),
        }
    }
}
