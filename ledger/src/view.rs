//! Bilateral nostro/vostro views.

use nostrovostro_common::{BilateralView, InstitutionId, InstitutionRecord, Result};
use tracing::instrument;

use crate::directory::InstitutionDirectory;

/// Derives an institution's relationship graph from current records.
#[derive(Debug, Clone)]
pub struct BilateralViewBuilder {
    directory: InstitutionDirectory,
}

impl BilateralViewBuilder {
    /// Create a builder over a directory.
    pub fn new(directory: InstitutionDirectory) -> Self {
        Self { directory }
    }

    /// Build the view for `id`.
    ///
    /// Vostro is the institution's own record. Nostro holds, for every other
    /// registered institution keeping an account for `id`, a record with only
    /// that account, in roster order. Without a roster, the counterparties
    /// named in the institution's own record are consulted instead.
    #[instrument(skip(self))]
    pub async fn build_view(&self, id: &InstitutionId) -> Result<BilateralView> {
        let own = self.directory.load(id).await?;

        let mut roster = self.directory.roster().await?;
        if roster.is_empty() {
            roster = own.accounts.iter().map(|a| a.holder.clone()).collect();
        }

        let mut nostro = Vec::new();
        for other in roster.iter().filter(|other| *other != id) {
            let record = self.directory.load(other).await?;
            if let Some(account) = record.account_for(id) {
                nostro.push(InstitutionRecord::new(other.clone()).with_account(account.clone()));
            }
        }

        Ok(BilateralView {
            owner: id.clone(),
            nostro,
            vostro: vec![own],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use nostrovostro_common::{Account, Currency, SettleError};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn seeded() -> InstitutionDirectory {
        let dir = InstitutionDirectory::new(Arc::new(MemoryStore::new()));
        let records = [
            InstitutionRecord::new("BANKA")
                .with_account(Account::new("BANKB", Currency::usd(), dec!(250000)))
                .with_account(Account::new("BANKC", Currency::usd(), dec!(360000))),
            InstitutionRecord::new("BANKB")
                .with_account(Account::new("BANKA", Currency::aud(), dec!(335000)))
                .with_account(Account::new("BANKC", Currency::aud(), dec!(120000))),
            InstitutionRecord::new("BANKC")
                .with_account(Account::new("BANKA", Currency::eur(), dec!(324000)))
                .with_account(Account::new("BANKB", Currency::eur(), dec!(80400))),
        ];
        for record in &records {
            dir.create(record).await.unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_view_of_bank_a() {
        let dir = seeded().await;
        let builder = BilateralViewBuilder::new(dir.clone());

        let view = builder.build_view(&"BANKA".into()).await.unwrap();

        assert_eq!(view.vostro, vec![dir.load(&"BANKA".into()).await.unwrap()]);
        assert_eq!(view.nostro.len(), 2);
        assert_eq!(view.nostro[0].owner.as_str(), "BANKB");
        assert_eq!(
            view.nostro[0].accounts,
            vec![Account::new("BANKA", Currency::aud(), dec!(335000))]
        );
        assert_eq!(view.nostro[1].owner.as_str(), "BANKC");
        assert_eq!(view.nostro[1].accounts[0].cash_balance, dec!(324000));
    }

    #[tokio::test]
    async fn test_view_is_idempotent() {
        let builder = BilateralViewBuilder::new(seeded().await);
        let first = builder.build_view(&"BANKB".into()).await.unwrap();
        let second = builder.build_view(&"BANKB".into()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_institution_without_correspondents() {
        let dir = seeded().await;
        dir.create(&InstitutionRecord::new("BANKD")).await.unwrap();
        let view = BilateralViewBuilder::new(dir).build_view(&"BANKD".into()).await.unwrap();

        assert!(view.nostro.is_empty());
        assert!(view.vostro[0].accounts.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_institution() {
        let builder = BilateralViewBuilder::new(seeded().await);
        let result = builder.build_view(&"BANKZ".into()).await;
        assert!(matches!(result, Err(SettleError::InstitutionNotFound(_))));
    }

    #[tokio::test]
    async fn test_falls_back_to_own_counterparties_without_roster() {
        let store = Arc::new(MemoryStore::new());
        let dir = InstitutionDirectory::new(store);
        let a = InstitutionRecord::new("BANKA")
            .with_account(Account::new("BANKB", Currency::usd(), dec!(10)));
        let b = InstitutionRecord::new("BANKB")
            .with_account(Account::new("BANKA", Currency::aud(), dec!(20)));
        dir.save(&a.owner.clone(), &a).await.unwrap();
        dir.save(&b.owner.clone(), &b).await.unwrap();

        let view = BilateralViewBuilder::new(dir).build_view(&"BANKA".into()).await.unwrap();
        assert_eq!(view.nostro.len(), 1);
        assert_eq!(view.nostro[0].accounts[0].cash_balance, dec!(20));
    }
}
