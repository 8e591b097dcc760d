//! Currency conversion record.

use nostrovostro_common::{CurrencyPair, FxRate, Money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Represents a completed currency conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    /// Input amount.
    pub input: Money,
    /// Output amount.
    pub output: Money,
    /// Rate used for conversion.
    pub rate: FxRate,
}

impl Conversion {
    /// Create a new conversion record.
    pub fn new(input: Money, output: Money, rate: FxRate) -> Self {
        Self { input, output, rate }
    }

    /// Get the factor used.
    pub fn factor(&self) -> Decimal {
        self.rate.factor
    }

    /// Get the currency pair.
    pub fn pair(&self) -> &CurrencyPair {
        &self.rate.pair
    }
}
