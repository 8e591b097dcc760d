//! Static rate table.

use std::collections::BTreeMap;
use std::path::Path;

use nostrovostro_common::{Currency, CurrencyPair, FxRate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FxError, FxResult};
use crate::provider::RateProvider;

/// One line of a rate file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateEntry {
    pub from: Currency,
    pub to: Currency,
    pub factor: Decimal,
}

/// Rate file layout: `{"rates": [{"from": "USD", "to": "AUD", "factor": "1.34"}, ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateFile {
    pub rates: Vec<RateEntry>,
}

/// Fixed lookup of conversion factors by ordered currency pair.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: BTreeMap<CurrencyPair, Decimal>,
}

impl RateTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default correspondent table: USD, AUD and EUR in all six
    /// directions.
    pub fn standard() -> Self {
        let usd = Currency::usd();
        let aud = Currency::aud();
        let eur = Currency::eur();

        let rates = [
            (&usd, &aud, Decimal::new(134, 2)),
            (&aud, &usd, Decimal::new(74, 2)),
            (&usd, &eur, Decimal::new(90, 2)),
            (&eur, &usd, Decimal::new(110, 2)),
            (&aud, &eur, Decimal::new(67, 2)),
            (&eur, &aud, Decimal::new(148, 2)),
        ];

        Self {
            rates: rates
                .into_iter()
                .map(|(from, to, factor)| (CurrencyPair::new(from.clone(), to.clone()), factor))
                .collect(),
        }
    }

    /// Add a factor. Identity pairs and non-positive factors are rejected.
    pub fn with_rate(mut self, from: Currency, to: Currency, factor: Decimal) -> FxResult<Self> {
        let pair = CurrencyPair::new(from, to);

        if pair.is_identity() {
            return Err(FxError::InvalidRate {
                pair,
                reason: "same-currency pairs are not configurable".to_string(),
            });
        }
        if factor <= Decimal::ZERO {
            return Err(FxError::InvalidRate {
                pair,
                reason: format!("factor must be positive, got {}", factor),
            });
        }

        self.rates.insert(pair, factor);
        Ok(self)
    }

    /// Build a table from rate file JSON.
    pub fn from_json(json: &str) -> FxResult<Self> {
        let file: RateFile =
            serde_json::from_str(json).map_err(|e| FxError::RateFile(e.to_string()))?;

        file.rates
            .into_iter()
            .try_fold(Self::new(), |table, entry| {
                table.with_rate(entry.from, entry.to, entry.factor)
            })
    }

    /// Load a table from a rate file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> FxResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| FxError::RateFile(format!("{}: {}", path.display(), e)))?;
        let table = Self::from_json(&json)?;

        info!(path = %path.display(), pairs = table.len(), "Loaded FX rate file");
        Ok(table)
    }

    /// Look up the factor for `from -> to`.
    pub fn rate(&self, from: &Currency, to: &Currency) -> FxResult<Decimal> {
        let pair = CurrencyPair::new(from.clone(), to.clone());
        self.rates
            .get(&pair)
            .copied()
            .ok_or(FxError::UnknownCurrencyPair(pair))
    }

    /// Number of configured pairs.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Whether no pairs are configured.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl RateProvider for RateTable {
    fn name(&self) -> &str {
        "STATIC"
    }

    fn get_rate(&self, pair: &CurrencyPair) -> FxResult<FxRate> {
        let factor = self.rate(&pair.base, &pair.quote)?;
        debug!(pair = %pair, factor = %factor, "Resolved FX rate");
        Ok(FxRate::new(pair.clone(), factor))
    }

    fn supports_pair(&self, pair: &CurrencyPair) -> bool {
        self.rates.contains_key(pair)
    }

    fn supported_pairs(&self) -> Vec<CurrencyPair> {
        self.rates.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_standard_table_has_six_pairs() {
        let table = RateTable::standard();
        assert_eq!(table.len(), 6);

        assert_eq!(table.rate(&Currency::usd(), &Currency::aud()).unwrap(), dec!(1.34));
        assert_eq!(table.rate(&Currency::aud(), &Currency::usd()).unwrap(), dec!(0.74));
        assert_eq!(table.rate(&Currency::usd(), &Currency::eur()).unwrap(), dec!(0.90));
        assert_eq!(table.rate(&Currency::eur(), &Currency::usd()).unwrap(), dec!(1.10));
        assert_eq!(table.rate(&Currency::aud(), &Currency::eur()).unwrap(), dec!(0.67));
        assert_eq!(table.rate(&Currency::eur(), &Currency::aud()).unwrap(), dec!(1.48));
    }

    #[test]
    fn test_same_currency_is_unknown() {
        let table = RateTable::standard();
        let result = table.rate(&Currency::usd(), &Currency::usd());
        assert!(matches!(result, Err(FxError::UnknownCurrencyPair(_))));
    }

    #[test]
    fn test_unconfigured_pair_is_unknown() {
        let table = RateTable::standard();
        let result = table.rate(&Currency::new("GBP"), &Currency::usd());
        assert!(matches!(result, Err(FxError::UnknownCurrencyPair(_))));
    }

    #[test]
    fn test_round_trip_is_not_identity() {
        let table = RateTable::standard();
        let there = table.rate(&Currency::usd(), &Currency::aud()).unwrap();
        let back = table.rate(&Currency::aud(), &Currency::usd()).unwrap();
        assert_ne!(there * back, Decimal::ONE);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"rates": [
            {"from": "USD", "to": "GBP", "factor": "0.79"},
            {"from": "GBP", "to": "USD", "factor": 1.27}
        ]}"#;
        let table = RateTable::from_json(json).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.rate(&Currency::usd(), &Currency::new("GBP")).unwrap(), dec!(0.79));
        assert!(table.rate(&Currency::usd(), &Currency::aud()).is_err());
    }

    #[test]
    fn test_from_json_rejects_bad_rates() {
        let identity = r#"{"rates": [{"from": "USD", "to": "USD", "factor": "1"}]}"#;
        assert!(matches!(
            RateTable::from_json(identity),
            Err(FxError::InvalidRate { .. })
        ));

        let negative = r#"{"rates": [{"from": "USD", "to": "AUD", "factor": "-1.34"}]}"#;
        assert!(matches!(
            RateTable::from_json(negative),
            Err(FxError::InvalidRate { .. })
        ));

        assert!(matches!(
            RateTable::from_json("not json"),
            Err(FxError::RateFile(_))
        ));
    }

    #[test]
    fn test_provider_supported_pairs() {
        let table = RateTable::standard();
        let pair = CurrencyPair::new(Currency::eur(), Currency::aud());

        assert!(table.supports_pair(&pair));
        assert!(table.supports_pair(&pair.inverse()));
        assert!(!table.supports_pair(&CurrencyPair::new(Currency::new("GBP"), Currency::eur())));
        assert_eq!(table.supported_pairs().len(), 6);
        assert_eq!(table.get_rate(&pair).unwrap().factor, dec!(1.48));
    }

    proptest! {
        #[test]
        fn prop_only_configured_pairs_resolve(from in "[A-Z]{3}", to in "[A-Z]{3}") {
            let table = RateTable::standard();
            let from = Currency::new(from);
            let to = Currency::new(to);
            let pair = CurrencyPair::new(from.clone(), to.clone());

            prop_assert_eq!(table.rate(&from, &to).is_ok(), table.supports_pair(&pair));
            if from == to {
                prop_assert!(table.rate(&from, &to).is_err());
            }
        }
    }
}
