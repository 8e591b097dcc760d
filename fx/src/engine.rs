//! FX engine: rate lookup and conversion over a [`RateProvider`].

use std::sync::Arc;

use nostrovostro_common::{ConversionError, Currency, CurrencyPair, FxRate, Money};
use tracing::{debug, instrument};

use crate::conversion::Conversion;
use crate::error::{FxError, FxResult};
use crate::provider::RateProvider;

/// Converts amounts between settlement currencies.
#[derive(Clone)]
pub struct FxEngine {
    provider: Arc<dyn RateProvider>,
}

impl FxEngine {
    /// Create a new FX engine with the given provider.
    pub fn new(provider: Arc<dyn RateProvider>) -> Self {
        Self { provider }
    }

    /// Get the rate for `from -> to`.
    pub fn rate(&self, from: &Currency, to: &Currency) -> FxResult<FxRate> {
        let pair = CurrencyPair::new(from.clone(), to.clone());
        if pair.is_identity() {
            return Err(FxError::UnknownCurrencyPair(pair));
        }
        self.provider.get_rate(&pair)
    }

    /// Convert an amount to another currency.
    #[instrument(skip_all, fields(from = %amount.currency, to = %target, value = %amount.value))]
    pub fn convert(&self, amount: &Money, target: &Currency) -> FxResult<Conversion> {
        let rate = self.rate(&amount.currency, target)?;
        let output = rate.convert(amount).map_err(|e| match e {
            ConversionError::Overflow { value, .. } => FxError::Overflow {
                pair: rate.pair.clone(),
                value,
            },
            other => FxError::InvalidRate {
                pair: rate.pair.clone(),
                reason: other.to_string(),
            },
        })?;

        debug!(output = %output, factor = %rate.factor, "Conversion computed");

        Ok(Conversion::new(amount.clone(), output, rate))
    }

    /// Get all supported currency pairs.
    pub fn supported_pairs(&self) -> Vec<CurrencyPair> {
        self.provider.supported_pairs()
    }

    /// Name of the underlying provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

impl std::fmt::Debug for FxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FxEngine")
            .field("provider", &self.provider.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RateTable;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn setup_engine() -> FxEngine {
        FxEngine::new(Arc::new(RateTable::standard()))
    }

    #[test]
    fn test_convert_usd_to_aud() {
        let engine = setup_engine();
        let usd = Money::new(dec!(1000), Currency::usd());

        let conversion = engine.convert(&usd, &Currency::aud()).unwrap();

        assert_eq!(conversion.output, Money::new(dec!(1340), Currency::aud()));
        assert_eq!(conversion.factor(), dec!(1.34));
        assert_eq!(conversion.pair().to_string(), "USD/AUD");
    }

    #[test]
    fn test_oversized_amount_is_an_overflow() {
        let engine = setup_engine();
        let usd = Money::new(Decimal::MAX, Currency::usd());

        let result = engine.convert(&usd, &Currency::aud());

        assert!(matches!(result, Err(FxError::Overflow { value, .. }) if value == Decimal::MAX));
    }

    #[test]
    fn test_identity_conversion_is_rejected() {
        let engine = setup_engine();
        let result = engine.rate(&Currency::eur(), &Currency::eur());
        assert!(matches!(result, Err(FxError::UnknownCurrencyPair(_))));
    }

    #[test]
    fn test_unknown_pair() {
        let engine = setup_engine();
        let result = engine.convert(&Money::new(dec!(1), Currency::new("JPY")), &Currency::usd());
        assert!(matches!(result, Err(FxError::UnknownCurrencyPair(_))));
        assert_eq!(engine.supported_pairs().len(), 6);
        assert_eq!(engine.provider_name(), "STATIC");
    }
}
