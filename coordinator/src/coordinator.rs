//! Settlement service facade.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use nostrovostro_common::{
    BilateralView, InstitutionId, InstitutionRecord, PaymentInstruction, Result, SettleError,
    Transaction,
};
use nostrovostro_fx::{FxEngine, RateProvider, RateTable};
use nostrovostro_ledger::{
    BilateralViewBuilder, InstitutionDirectory, KeyValueStore, TransactionJournal,
};

use crate::bootstrap;
use crate::config::CoordinatorConfig;
use crate::lock_manager::InstitutionLockManager;
use crate::metrics::{Metrics, MetricsSnapshot, SharedMetrics};
use crate::settlement_processor::SettlementProcessor;
use crate::state::CoordinatorState;
use crate::validator::TransactionValidator;

/// Entry point for instructions and queries.
pub struct Coordinator {
    config: CoordinatorConfig,
    state: Arc<RwLock<CoordinatorState>>,
    directory: InstitutionDirectory,
    journal: Arc<TransactionJournal>,
    views: BilateralViewBuilder,
    processor: Arc<SettlementProcessor>,
    metrics: SharedMetrics,
}

impl Coordinator {
    /// Create a coordinator over a store. Rates come from the configured
    /// rate file, or the default table when none is set.
    pub fn new(config: CoordinatorConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let rates = match &config.fx_rates_path {
            Some(path) => RateTable::from_file(path)?,
            None => RateTable::standard(),
        };
        Ok(Self::with_rates(config, store, Arc::new(rates)))
    }

    /// Create a coordinator with an explicit rate provider.
    pub fn with_rates(
        config: CoordinatorConfig,
        store: Arc<dyn KeyValueStore>,
        rates: Arc<dyn RateProvider>,
    ) -> Self {
        let directory = InstitutionDirectory::new(store.clone());
        let journal = Arc::new(TransactionJournal::new(store, config.auditor_id.clone()));
        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let validator = TransactionValidator::new(directory.clone(), FxEngine::new(rates));
        let processor = Arc::new(SettlementProcessor::new(
            directory.clone(),
            journal.clone(),
            validator,
            Arc::new(InstitutionLockManager::new()),
            config.settlement_config.clone(),
            metrics.clone(),
        ));

        Self {
            views: BilateralViewBuilder::new(directory.clone()),
            config,
            state: Arc::new(RwLock::new(CoordinatorState::Starting)),
            directory,
            journal,
            processor,
            metrics,
        }
    }

    /// Seed, import, recover, then start accepting requests.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        info!(auditor = %self.config.auditor_id, "Starting settlement service");

        if self.config.bootstrap {
            bootstrap::seed_default_institutions(&self.directory).await?;
        }

        let imported = self.journal.import_legacy().await?;
        if imported > 0 {
            info!(imported, "Legacy journal imported");
        }

        *self.state.write() = CoordinatorState::Recovering;
        let recovered = self.processor.recover().await?;
        if recovered > 0 {
            warn!(recovered, "Replayed interrupted settlements");
        }

        *self.state.write() = CoordinatorState::Running;
        info!("Settlement service running");
        Ok(())
    }

    /// Stop accepting requests.
    pub fn stop(&self) {
        *self.state.write() = CoordinatorState::Stopped;
        info!("Settlement service stopped");
    }

    /// Submit a ten-field payment instruction.
    ///
    /// Returns the journaled transaction, whose status says whether it
    /// settled. Instructions with the wrong field count are refused and not
    /// journaled.
    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    pub async fn submit_transaction<S: AsRef<str>>(&self, fields: &[S]) -> Result<Transaction> {
        self.ensure_accepting()?;
        self.metrics.instruction_submitted();

        let instruction = PaymentInstruction::from_fields(fields).map_err(|e| {
            self.metrics.instruction_malformed();
            warn!(error = %e, "Malformed instruction");
            e
        })?;

        self.processor.settle(&instruction).await
    }

    /// Register a new institution.
    pub async fn create_institution(&self, record: InstitutionRecord) -> Result<()> {
        self.ensure_accepting()?;
        self.directory.create(&record).await?;
        Ok(())
    }

    /// An institution's own record.
    pub async fn get_institution(&self, id: &InstitutionId) -> Result<InstitutionRecord> {
        self.ensure_accepting()?;
        self.directory.load(id).await
    }

    /// An institution's nostro/vostro view.
    pub async fn get_bilateral_view(&self, id: &InstitutionId) -> Result<BilateralView> {
        self.ensure_accepting()?;
        self.views.build_view(id).await
    }

    /// Transactions involving `id`; all of them for the audit-role id.
    pub async fn get_transactions(&self, id: &InstitutionId) -> Result<Vec<Transaction>> {
        self.ensure_accepting()?;
        self.journal.query_by_participant(id).await
    }

    /// Number of journaled transactions.
    pub async fn journal_len(&self) -> Result<u64> {
        self.journal.len().await
    }

    /// Replay interrupted settlements. Each intent is replayed under its
    /// institutions' locks, so this may run beside live settlements.
    pub async fn recover(&self) -> Result<usize> {
        if self.state().is_terminal() {
            return Err(SettleError::NotAccepting);
        }
        self.processor.recover().await
    }

    /// Check if the service is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests()
    }

    /// Get the current state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Current metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Metrics in Prometheus text format.
    pub fn metrics_prometheus(&self) -> String {
        self.metrics.to_prometheus()
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting_requests() {
            Ok(())
        } else {
            Err(SettleError::NotAccepting)
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostrovostro_common::{Account, Currency, StatusCode};
    use nostrovostro_ledger::{keys, MemoryStore};
    use rust_decimal_macros::dec;

    async fn running() -> Coordinator {
        let coordinator =
            Coordinator::new(CoordinatorConfig::default(), Arc::new(MemoryStore::new())).unwrap();
        coordinator.start().await.unwrap();
        coordinator
    }

    fn fields(reference: &str, currency: &str, amount: &str, sender: &str, receiver: &str) -> Vec<String> {
        [reference, "CRED", "2017-01-01", currency, amount, sender, receiver, "alice", "bob", "SHA"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    async fn balance(c: &Coordinator, owner: &str, holder: &str) -> rust_decimal::Decimal {
        c.get_institution(&owner.into())
            .await
            .unwrap()
            .account_for(&holder.into())
            .unwrap()
            .cash_balance
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let coordinator =
            Coordinator::new(CoordinatorConfig::default(), Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Starting);

        let early = coordinator.get_institution(&"BANKA".into()).await;
        assert!(matches!(early, Err(SettleError::NotAccepting)));

        coordinator.start().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Running);
        assert_eq!(coordinator.recover().await.unwrap(), 0);

        coordinator.stop();
        assert!(coordinator.state().is_terminal());
        let late = coordinator.submit_transaction(&fields("R1", "USD", "1", "BANKA", "BANKB")).await;
        assert!(matches!(late, Err(SettleError::NotAccepting)));
        assert!(matches!(coordinator.recover().await, Err(SettleError::NotAccepting)));
    }

    #[tokio::test]
    async fn test_bootstrap_records() {
        let c = running().await;
        assert_eq!(balance(&c, "BANKA", "BANKB").await, dec!(250000));
        assert_eq!(balance(&c, "BANKA", "BANKC").await, dec!(360000));
        assert_eq!(balance(&c, "BANKB", "BANKA").await, dec!(335000));
        assert_eq!(balance(&c, "BANKB", "BANKC").await, dec!(120000));
        assert_eq!(balance(&c, "BANKC", "BANKA").await, dec!(324000));
        assert_eq!(balance(&c, "BANKC", "BANKB").await, dec!(80400));
        assert!(c.get_transactions(&"AUDITOR".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_payment() {
        let c = running().await;

        let tx = c
            .submit_transaction(&fields("R1", "USD", "1000", "BANKA", "BANKB"))
            .await
            .unwrap();

        assert_eq!(tx.status_code, StatusCode::Completed);
        assert_eq!(tx.status_message, "Transaction Completed");
        assert_eq!(balance(&c, "BANKB", "BANKA").await, dec!(333660));
        assert_eq!(balance(&c, "BANKA", "BANKB").await, dec!(251000));

        let history = c.get_transactions(&"BANKB".into()).await.unwrap();
        assert_eq!(history, vec![tx]);
    }

    #[tokio::test]
    async fn test_insufficient_funds_payment() {
        let c = running().await;

        let tx = c
            .submit_transaction(&fields("R1", "USD", "1000000", "BANKA", "BANKB"))
            .await
            .unwrap();

        assert_eq!(tx.status_code, StatusCode::Failed);
        assert_eq!(tx.status_message, "Insufficient funds on Nostro Account");
        assert_eq!(balance(&c, "BANKB", "BANKA").await, dec!(335000));
        assert_eq!(balance(&c, "BANKA", "BANKB").await, dec!(250000));
        assert_eq!(c.get_transactions(&"AUDITOR".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_instruction_not_journaled() {
        let c = running().await;
        let mut short = fields("R1", "USD", "1000", "BANKA", "BANKB");
        short.pop();

        let result = c.submit_transaction(&short).await;

        assert!(matches!(
            result,
            Err(SettleError::MalformedInstruction { expected: 10, actual: 9 })
        ));
        assert_eq!(c.journal_len().await.unwrap(), 0);
        assert_eq!(c.metrics().instructions_malformed, 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_not_journaled() {
        let c = running().await;
        let result = c
            .submit_transaction(&fields("R1", "USD", "10", "BANKA", "NOBANK"))
            .await;

        assert!(matches!(result, Err(SettleError::InstitutionNotFound(_))));
        assert_eq!(c.journal_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_journal_grows_once_per_validated_instruction() {
        let c = running().await;
        let submissions = [
            fields("R1", "USD", "1000", "BANKA", "BANKB"),
            fields("R2", "EUR", "500", "BANKC", "BANKA"),
            fields("R3", "GBP", "1", "BANKA", "BANKC"),
            fields("R4", "USD", "abc", "BANKA", "BANKB"),
        ];
        for (i, submission) in submissions.iter().enumerate() {
            c.submit_transaction(submission).await.unwrap();
            assert_eq!(c.journal_len().await.unwrap(), i as u64 + 1);
        }

        let all = c.get_transactions(&"AUDITOR".into()).await.unwrap();
        let refs: Vec<_> = all.iter().map(|t| t.ref_number.as_str()).collect();
        assert_eq!(refs, ["R1", "R2", "R3", "R4"]);

        let bank_b: Vec<_> = c
            .get_transactions(&"BANKB".into())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.ref_number)
            .collect();
        assert_eq!(bank_b, ["R1", "R4"]);
    }

    #[tokio::test]
    async fn test_bilateral_view_reflects_settlement() {
        let c = running().await;
        let before = c.get_bilateral_view(&"BANKA".into()).await.unwrap();
        assert_eq!(before, c.get_bilateral_view(&"BANKA".into()).await.unwrap());

        c.submit_transaction(&fields("R1", "USD", "1000", "BANKA", "BANKB"))
            .await
            .unwrap();

        let after = c.get_bilateral_view(&"BANKA".into()).await.unwrap();
        assert_eq!(after.nostro[0].owner.as_str(), "BANKB");
        assert_eq!(after.nostro[0].accounts[0].cash_balance, dec!(333660));
        assert_eq!(
            after.vostro[0].account_for(&"BANKB".into()).unwrap().cash_balance,
            dec!(251000)
        );
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_create_institution() {
        let c = running().await;
        let record = InstitutionRecord::new("BANKD")
            .with_account(Account::new("BANKA", Currency::new("GBP"), dec!(1000)));

        c.create_institution(record.clone()).await.unwrap();
        assert_eq!(c.get_institution(&"BANKD".into()).await.unwrap(), record);

        let again = c.create_institution(record).await;
        assert!(matches!(again, Err(SettleError::InstitutionExists(_))));

        let view = c.get_bilateral_view(&"BANKA".into()).await.unwrap();
        assert_eq!(view.nostro.len(), 3);
    }

    #[tokio::test]
    async fn test_restart_keeps_state_and_imports_legacy_journal() {
        let store = Arc::new(MemoryStore::new());
        let legacy = serde_json::json!({"transactions": [{
            "refNumber": "OLD1", "opCode": "CRED", "vDate": "2016-12-01",
            "currency": "USD", "amount": 5, "sender": "BANKA", "receiver": "BANKC",
            "ordcust": "a", "benefcust": "b", "detcharges": "SHA",
            "statusCode": 0, "statusMsg": "Invalid Amount"
        }]});
        store
            .put(keys::LEGACY_JOURNAL, serde_json::to_vec(&legacy).unwrap())
            .await
            .unwrap();

        let first = Coordinator::new(CoordinatorConfig::default(), store.clone()).unwrap();
        first.start().await.unwrap();
        first
            .submit_transaction(&fields("R1", "USD", "1000", "BANKA", "BANKB"))
            .await
            .unwrap();
        first.stop();

        let second = Coordinator::new(CoordinatorConfig::default(), store).unwrap();
        second.start().await.unwrap();

        assert_eq!(balance(&second, "BANKA", "BANKB").await, dec!(251000));
        let refs: Vec<_> = second
            .get_transactions(&"BANKA".into())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.ref_number)
            .collect();
        assert_eq!(refs, ["OLD1", "R1"]);
    }

    #[tokio::test]
    async fn test_custom_auditor_and_rates() {
        let mut config = CoordinatorConfig::default();
        config.auditor_id = "CENTRAL".into();
        let rates = RateTable::new()
            .with_rate(Currency::usd(), Currency::aud(), dec!(2))
            .unwrap();
        let c = Coordinator::with_rates(config, Arc::new(MemoryStore::new()), Arc::new(rates));
        c.start().await.unwrap();

        let tx = c
            .submit_transaction(&fields("R1", "USD", "100", "BANKA", "BANKB"))
            .await
            .unwrap();
        assert_eq!(tx.converted_amount, Some(dec!(200)));

        // AUD -> USD is not configured.
        let tx = c
            .submit_transaction(&fields("R2", "AUD", "100", "BANKB", "BANKA"))
            .await
            .unwrap();
        assert_eq!(tx.status_message, "Invalid Currency");

        assert_eq!(c.get_transactions(&"CENTRAL".into()).await.unwrap().len(), 2);
        assert!(c.get_transactions(&"AUDITOR".into()).await.unwrap().is_empty());
    }
}
