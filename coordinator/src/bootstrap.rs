//! Default correspondent network.
//!
//! Three banks, each keeping accounts in its home currency for the other
//! two. The mirrored balances match the default FX table: BANKB holds
//! 250000 USD × 1.34 = 335000 AUD for BANKA, and so on.

use rust_decimal::Decimal;
use tracing::{info, instrument};

use nostrovostro_common::{Account, Currency, InstitutionRecord, Result, SettleError};
use nostrovostro_ledger::InstitutionDirectory;

/// The default institution records.
pub fn default_institutions() -> Vec<InstitutionRecord> {
    vec![
        InstitutionRecord::new("BANKA")
            .with_account(Account::new("BANKB", Currency::usd(), Decimal::new(250_000, 0)))
            .with_account(Account::new("BANKC", Currency::usd(), Decimal::new(360_000, 0))),
        InstitutionRecord::new("BANKB")
            .with_account(Account::new("BANKA", Currency::aud(), Decimal::new(335_000, 0)))
            .with_account(Account::new("BANKC", Currency::aud(), Decimal::new(120_000, 0))),
        InstitutionRecord::new("BANKC")
            .with_account(Account::new("BANKA", Currency::eur(), Decimal::new(324_000, 0)))
            .with_account(Account::new("BANKB", Currency::eur(), Decimal::new(80_400, 0))),
    ]
}

/// Create the default institutions. Existing records are left untouched,
/// so restarting against a populated store keeps its balances. Returns how
/// many records were created.
#[instrument(skip(directory))]
pub async fn seed_default_institutions(directory: &InstitutionDirectory) -> Result<usize> {
    let mut created = 0;
    for record in default_institutions() {
        match directory.create(&record).await {
            Ok(_) => created += 1,
            Err(SettleError::InstitutionExists(_)) => {
                // A crash between record and registry write leaves it unlisted.
                directory.register(&record.owner).await?;
            }
            Err(e) => return Err(e),
        }
    }

    info!(created, "Default institutions seeded");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use nostrovostro_common::InstitutionId;
    use nostrovostro_fx::RateTable;
    use nostrovostro_ledger::MemoryStore;

    #[test]
    fn test_mirrored_balances_follow_default_rates() {
        let rates = RateTable::standard();
        let records = default_institutions();
        let balance = |owner: usize, holder: &str| {
            records[owner]
                .account_for(&InstitutionId::new(holder))
                .map(|a| a.cash_balance)
                .unwrap()
        };

        let usd_aud = rates.rate(&Currency::usd(), &Currency::aud()).unwrap();
        let usd_eur = rates.rate(&Currency::usd(), &Currency::eur()).unwrap();
        let aud_eur = rates.rate(&Currency::aud(), &Currency::eur()).unwrap();

        assert_eq!(balance(0, "BANKB") * usd_aud, balance(1, "BANKA"));
        assert_eq!(balance(0, "BANKC") * usd_eur, balance(2, "BANKA"));
        assert_eq!(balance(1, "BANKC") * aud_eur, balance(2, "BANKB"));
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let directory = InstitutionDirectory::new(Arc::new(MemoryStore::new()));

        assert_eq!(seed_default_institutions(&directory).await.unwrap(), 3);
        assert_eq!(seed_default_institutions(&directory).await.unwrap(), 0);
        assert_eq!(directory.roster().await.unwrap().len(), 3);
    }
}
