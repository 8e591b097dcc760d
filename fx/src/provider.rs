//! Rate provider trait.

use nostrovostro_common::{CurrencyPair, FxRate};

use crate::error::FxResult;

/// Source of FX factors.
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Get the rate for an ordered currency pair.
    fn get_rate(&self, pair: &CurrencyPair) -> FxResult<FxRate>;

    /// Check if this provider supports the given currency pair.
    fn supports_pair(&self, pair: &CurrencyPair) -> bool;

    /// Get all supported currency pairs.
    fn supported_pairs(&self) -> Vec<CurrencyPair>;
}
