//! Settlement processing logic.
//!
//! A settlement locks both institutions, validates the instruction against
//! fresh records, and then writes both legs and the journal entry. On a
//! store with atomic batches everything lands in one version-checked batch.
//! Otherwise a write-ahead intent is recorded first and each leg is written
//! with compare-and-swap.
//!
//! The timeout bounds lock acquisition and validation. Once writes begin
//! they run to completion, so an attempt is never abandoned between legs.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use nostrovostro_common::{
    InstitutionRecord, PaymentInstruction, Result, SettleError, Transaction,
};
use nostrovostro_ledger::{
    Expected, InstitutionDirectory, IntentLog, RecordUpdate, SettlementIntent, TransactionJournal,
    Version, WriteBatch,
};

use crate::config::SettlementConfig;
use crate::lock_manager::{InstitutionLockManager, SettlementGuard};
use crate::metrics::SharedMetrics;
use crate::validator::{TransactionValidator, ValidationOutcome};

/// One record write planned by a settlement.
#[derive(Debug, Clone)]
struct PlannedWrite {
    update: RecordUpdate,
    updated: InstitutionRecord,
}

/// Settlement processor handles the settlement lifecycle.
pub struct SettlementProcessor {
    directory: InstitutionDirectory,
    journal: Arc<TransactionJournal>,
    intents: IntentLog,
    validator: TransactionValidator,
    locks: Arc<InstitutionLockManager>,
    config: SettlementConfig,
    metrics: SharedMetrics,
}

impl SettlementProcessor {
    /// Create a new settlement processor.
    pub fn new(
        directory: InstitutionDirectory,
        journal: Arc<TransactionJournal>,
        validator: TransactionValidator,
        locks: Arc<InstitutionLockManager>,
        config: SettlementConfig,
        metrics: SharedMetrics,
    ) -> Self {
        let intents = IntentLog::new(directory.store().clone());
        Self {
            directory,
            journal,
            intents,
            validator,
            locks,
            config,
            metrics,
        }
    }

    /// Validate, settle and journal an instruction.
    ///
    /// Returns the journaled transaction, settled or rejected. An uncompensated
    /// [`SettleError::PartialCommit`] means balances may have moved without a
    /// journal entry; the pending intent is completed by [`Self::recover`].
    /// Any other error means no balance moved and nothing was journaled.
    #[instrument(
        skip(self, instruction),
        fields(
            ref_number = %instruction.ref_number,
            sender = %instruction.sender,
            receiver = %instruction.receiver,
            amount = %instruction.amount,
        )
    )]
    pub async fn settle(&self, instruction: &PaymentInstruction) -> Result<Transaction> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.attempt(instruction).await;

            match result {
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    if matches!(e, SettleError::Conflict(_)) {
                        self.metrics.cas_retry();
                    }
                    warn!(attempt, error = %e, "Settlement attempt failed, retrying");
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                }
                Err(SettleError::Conflict(key)) => {
                    self.metrics.instruction_errored();
                    warn!(key = %key, attempts = attempt, "Concurrent modification, giving up");
                    return Err(SettleError::ConcurrentModification {
                        ref_number: instruction.ref_number.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    self.metrics.instruction_errored();
                    return Err(e);
                }
                Ok(tx) => {
                    if tx.is_completed() {
                        self.metrics.instruction_completed();
                    } else {
                        self.metrics.instruction_rejected();
                    }
                    return Ok(tx);
                }
            }
        }
    }

    async fn attempt(&self, instruction: &PaymentInstruction) -> Result<Transaction> {
        let (_guard, outcome) = tokio::time::timeout(self.config.timeout, self.prepare(instruction))
            .await
            .map_err(|_| {
                self.metrics.timeout();
                SettleError::Timeout(format!(
                    "settlement {} exceeded {:?}",
                    instruction.ref_number, self.config.timeout
                ))
            })??;

        if !outcome.is_settleable() {
            let tx = outcome.transaction;
            self.journal.append(&tx).await?;
            warn!(status = tx.status_message.as_str(), "Instruction rejected");
            return Ok(tx);
        }

        let writes = Self::plan(&outcome)?;
        let tx = outcome.transaction;

        if self.directory.store().supports_batches() {
            self.commit_batch(&tx, writes).await?;
        } else {
            self.commit_with_intent(&tx, writes).await?;
        }

        info!(
            fx_rate = ?tx.fx_rate,
            converted = ?tx.converted_amount,
            "Settlement completed"
        );
        Ok(tx)
    }

    async fn prepare(
        &self,
        instruction: &PaymentInstruction,
    ) -> Result<(SettlementGuard, ValidationOutcome)> {
        let guard = self
            .locks
            .acquire(&instruction.sender, &instruction.receiver)
            .await;
        let outcome = self.validator.validate(instruction).await?;
        Ok((guard, outcome))
    }

    /// Credit the vostro account (sender's record, holder = receiver) by the
    /// instruction amount and debit the nostro account (receiver's record,
    /// holder = sender) by the converted amount. A self-payment touches one
    /// record once.
    fn plan(outcome: &ValidationOutcome) -> Result<Vec<PlannedWrite>> {
        let tx = &outcome.transaction;
        let credit = tx.amount;
        let debit = -outcome.nostro_debit();

        let updates = if tx.sender == tx.receiver {
            vec![(
                RecordUpdate::new(tx.sender.clone(), outcome.sender.version)
                    .adjust(tx.receiver.clone(), credit)
                    .adjust(tx.sender.clone(), debit),
                &outcome.sender.record,
            )]
        } else {
            vec![
                (
                    RecordUpdate::new(tx.sender.clone(), outcome.sender.version)
                        .adjust(tx.receiver.clone(), credit),
                    &outcome.sender.record,
                ),
                (
                    RecordUpdate::new(tx.receiver.clone(), outcome.receiver.version)
                        .adjust(tx.sender.clone(), debit),
                    &outcome.receiver.record,
                ),
            ]
        };

        updates
            .into_iter()
            .map(|(update, base)| {
                let mut updated = base.clone();
                update.apply_to(&mut updated)?;
                Ok(PlannedWrite { update, updated })
            })
            .collect()
    }

    async fn commit_batch(&self, tx: &Transaction, writes: Vec<PlannedWrite>) -> Result<()> {
        let mut batch = WriteBatch::new();
        for write in &writes {
            self.directory.stage(
                &mut batch,
                &write.update.institution,
                &write.updated,
                Expected::Version(write.update.base_version),
            )?;
        }
        self.journal.append_with(tx, batch).await?;
        Ok(())
    }

    async fn commit_with_intent(&self, tx: &Transaction, writes: Vec<PlannedWrite>) -> Result<()> {
        let intent = SettlementIntent::new(
            tx.clone(),
            writes.iter().map(|w| w.update.clone()).collect(),
        );
        self.intents.record(&intent).await?;

        let mut written: Vec<(&PlannedWrite, Version)> = Vec::with_capacity(writes.len());
        for write in &writes {
            let result = self
                .directory
                .save_if(
                    &write.update.institution,
                    &write.updated,
                    Expected::Version(write.update.base_version),
                )
                .await;

            match result {
                Ok(version) => written.push((write, version)),
                Err(e) if written.is_empty() => {
                    // Nothing landed; a stale intent would replay forward.
                    if let Err(resolve) = self.intents.resolve(intent.id).await {
                        return Err(self.left_for_recovery(tx, &intent, resolve));
                    }
                    return Err(e);
                }
                Err(e) => return Err(self.compensate(tx, &intent, &written, e).await),
            }
        }

        // Every leg is written. No failure past this point may reach the
        // retry loop, or the legs would be posted again.
        if let Err(e) = self.journal.append_for_intent(tx, intent.id).await {
            return Err(self.left_for_recovery(tx, &intent, e));
        }
        if let Err(e) = self.intents.resolve(intent.id).await {
            warn!(
                ref_number = %tx.ref_number,
                intent = %intent.id,
                error = %e,
                "Settled intent not resolved; recovery will drop it"
            );
        }
        Ok(())
    }

    /// Report a settlement whose intent must stay pending for recovery.
    fn left_for_recovery(
        &self,
        tx: &Transaction,
        intent: &SettlementIntent,
        cause: SettleError,
    ) -> SettleError {
        self.metrics.partial_commit();
        error!(
            ref_number = %tx.ref_number,
            intent = %intent.id,
            cause = %cause,
            "Settlement incomplete; intent left for recovery"
        );
        SettleError::PartialCommit {
            ref_number: tx.ref_number.clone(),
            reason: cause.to_string(),
            compensated: false,
        }
    }

    /// Undo the legs already written after a later leg failed.
    async fn compensate(
        &self,
        tx: &Transaction,
        intent: &SettlementIntent,
        written: &[(&PlannedWrite, Version)],
        cause: SettleError,
    ) -> SettleError {
        self.metrics.partial_commit();
        let reason = cause.to_string();

        // Recovery replays pending intents forward, so the intent must be
        // gone before any leg is reversed.
        if let Err(e) = self.intents.resolve(intent.id).await {
            error!(
                ref_number = %tx.ref_number,
                cause = %reason,
                error = %e,
                "Partial commit; intent left for recovery"
            );
            return SettleError::PartialCommit {
                ref_number: tx.ref_number.clone(),
                reason,
                compensated: false,
            };
        }

        let mut compensated = true;
        for (write, version) in written {
            let reversal = write.update.reversed();
            let mut record = write.updated.clone();
            let result = match reversal.apply_to(&mut record) {
                Ok(()) => {
                    self.directory
                        .save_if(&reversal.institution, &record, Expected::Version(*version))
                        .await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                compensated = false;
                error!(
                    ref_number = %tx.ref_number,
                    institution = %reversal.institution,
                    error = %e,
                    "Compensating write failed"
                );
            }
        }

        error!(
            ref_number = %tx.ref_number,
            cause = %reason,
            compensated,
            "Partial commit"
        );
        SettleError::PartialCommit {
            ref_number: tx.ref_number.clone(),
            reason,
            compensated,
        }
    }

    /// Replay intents left by an interrupted or partially failed settlement.
    /// Each intent is rolled forward under the locks of both institutions:
    /// unwritten legs are written, the transaction is journaled unless an
    /// entry for the intent exists, and the intent is removed. Returns how
    /// many intents were replayed.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let pending = self.intents.pending().await?;
        let mut replayed = 0;
        for intent in &pending {
            let tx = &intent.transaction;
            let _guard = self.locks.acquire(&tx.sender, &tx.receiver).await;

            // The settlement that owned it may have finished while we waited.
            if !self.intents.is_pending(intent.id).await? {
                continue;
            }

            self.intents.replay_updates(intent, &self.directory).await?;
            if !self.journal.contains_intent(&tx.sender, intent.id).await? {
                self.journal.append_for_intent(tx, intent.id).await?;
            }

            self.intents.resolve(intent.id).await?;
            self.metrics.intent_replayed();
            replayed += 1;
            info!(ref_number = %tx.ref_number, intent = %intent.id, "Recovered settlement");
        }
        Ok(replayed)
    }
}

impl std::fmt::Debug for SettlementProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use nostrovostro_common::{InstitutionId, StatusCode, DEFAULT_AUDITOR_ID};
    use nostrovostro_fx::{FxEngine, RateTable};
    use nostrovostro_ledger::{keys, FaultyStore, MemoryStore};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::bootstrap;
    use crate::metrics::Metrics;

    struct Harness {
        processor: SettlementProcessor,
        directory: InstitutionDirectory,
        journal: Arc<TransactionJournal>,
        metrics: SharedMetrics,
        store: Arc<FaultyStore>,
    }

    impl Harness {
        async fn new(store: MemoryStore, config: SettlementConfig) -> Self {
            let store = Arc::new(FaultyStore::new(store));
            let directory = InstitutionDirectory::new(store.clone());
            bootstrap::seed_default_institutions(&directory).await.unwrap();

            let journal = Arc::new(TransactionJournal::new(store.clone(), DEFAULT_AUDITOR_ID.into()));
            let validator = TransactionValidator::new(
                directory.clone(),
                FxEngine::new(Arc::new(RateTable::standard())),
            );
            let metrics = Arc::new(Metrics::new());
            let processor = SettlementProcessor::new(
                directory.clone(),
                journal.clone(),
                validator,
                Arc::new(InstitutionLockManager::new()),
                config,
                metrics.clone(),
            );

            Self {
                processor,
                directory,
                journal,
                metrics,
                store,
            }
        }

        async fn balance(&self, owner: &str, holder: &str) -> Decimal {
            self.directory
                .load(&owner.into())
                .await
                .unwrap()
                .account_for(&holder.into())
                .unwrap()
                .cash_balance
        }

        async fn pending_intents(&self) -> usize {
            self.processor.intents.pending().await.unwrap().len()
        }
    }

    fn quick_config() -> SettlementConfig {
        SettlementConfig {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn instruction(reference: &str, currency: &str, amount: &str, sender: &str, receiver: &str) -> PaymentInstruction {
        PaymentInstruction::from_fields(&[
            reference, "CRED", "2017-01-01", currency, amount, sender, receiver, "alice", "bob", "SHA",
        ])
        .unwrap()
    }

    fn stores() -> [MemoryStore; 2] {
        [MemoryStore::new(), MemoryStore::without_batches()]
    }

    #[tokio::test]
    async fn test_settles_both_legs() {
        for store in stores() {
            let h = Harness::new(store, quick_config()).await;

            let tx = h
                .processor
                .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
                .await
                .unwrap();

            assert_eq!(tx.status_code, StatusCode::Completed);
            assert_eq!(tx.converted_amount, Some(dec!(1340)));
            assert_eq!(h.balance("BANKA", "BANKB").await, dec!(251000));
            assert_eq!(h.balance("BANKB", "BANKA").await, dec!(333660));
            assert_eq!(h.balance("BANKA", "BANKC").await, dec!(360000));
            assert_eq!(h.balance("BANKB", "BANKC").await, dec!(120000));
            assert_eq!(h.balance("BANKC", "BANKA").await, dec!(324000));
            assert_eq!(h.journal.all().await.unwrap(), vec![tx]);
            assert_eq!(h.pending_intents().await, 0);
        }
    }

    #[tokio::test]
    async fn test_rejection_is_journaled_without_mutation() {
        for store in stores() {
            let h = Harness::new(store, quick_config()).await;

            let tx = h
                .processor
                .settle(&instruction("R1", "USD", "1000000", "BANKA", "BANKB"))
                .await
                .unwrap();

            assert_eq!(tx.status_code, StatusCode::Failed);
            assert_eq!(tx.status_message, "Insufficient funds on Nostro Account");
            assert_eq!(h.balance("BANKA", "BANKB").await, dec!(250000));
            assert_eq!(h.balance("BANKB", "BANKA").await, dec!(335000));
            assert_eq!(h.journal.len().await.unwrap(), 1);
            assert_eq!(h.metrics.snapshot().instructions_rejected, 1);
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        for store in stores() {
            let h = Harness::new(store, quick_config()).await;
            h.store.interfere_on_get("BANKA", 1);

            let tx = h
                .processor
                .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
                .await
                .unwrap();

            assert!(tx.is_completed());
            assert_eq!(h.metrics.snapshot().cas_retries, 1);
            assert_eq!(h.balance("BANKA", "BANKB").await, dec!(251000));
            assert_eq!(h.balance("BANKB", "BANKA").await, dec!(333660));
            assert_eq!(h.journal.len().await.unwrap(), 1);
            assert_eq!(h.pending_intents().await, 0);
        }
    }

    #[tokio::test]
    async fn test_conflict_retries_exhausted() {
        for store in stores() {
            let h = Harness::new(store, quick_config()).await;
            h.store.interfere_on_get("BANKA", 10);

            let result = h
                .processor
                .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
                .await;

            assert!(matches!(
                result,
                Err(SettleError::ConcurrentModification { attempts: 4, .. })
            ));
            assert_eq!(h.balance("BANKB", "BANKA").await, dec!(335000));
            assert_eq!(h.journal.len().await.unwrap(), 0);
            assert_eq!(h.metrics.snapshot().instructions_errored, 1);
        }
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_trace() {
        let config = SettlementConfig {
            timeout: Duration::from_millis(20),
            max_retries: 1,
            retry_backoff: Duration::from_millis(1),
        };
        let h = Harness::new(MemoryStore::new(), config).await;
        h.store.set_get_delay(Some(Duration::from_millis(200)));

        let result = h
            .processor
            .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
            .await;

        assert!(matches!(result, Err(SettleError::Timeout(_))));
        assert_eq!(h.metrics.snapshot().timeouts, 2);

        h.store.set_get_delay(None);
        assert_eq!(h.balance("BANKA", "BANKB").await, dec!(250000));
        assert_eq!(h.journal.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_partial_commit_is_compensated() {
        let h = Harness::new(MemoryStore::without_batches(), quick_config()).await;
        h.store.fail_next_writes("BANKB", 1);

        let result = h
            .processor
            .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
            .await;

        match result {
            Err(e @ SettleError::PartialCommit { compensated: true, .. }) => {
                assert!(!e.is_ledger_inconsistency())
            }
            other => panic!("expected compensated partial commit, got {:?}", other),
        }
        assert_eq!(h.balance("BANKA", "BANKB").await, dec!(250000));
        assert_eq!(h.balance("BANKB", "BANKA").await, dec!(335000));
        assert_eq!(h.journal.len().await.unwrap(), 0);
        assert_eq!(h.pending_intents().await, 0);
        assert_eq!(h.metrics.snapshot().partial_commits, 1);
    }

    #[tokio::test]
    async fn test_failed_compensation_is_reported() {
        let h = Harness::new(MemoryStore::without_batches(), quick_config()).await;
        h.store.fail_writes("BANKA", 1, 1);
        h.store.fail_next_writes("BANKB", 1);

        let result = h
            .processor
            .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
            .await;

        assert!(matches!(
            &result,
            Err(e @ SettleError::PartialCommit { compensated: false, .. }) if e.is_ledger_inconsistency()
        ));
        assert_eq!(h.balance("BANKA", "BANKB").await, dec!(251000));
        assert_eq!(h.balance("BANKB", "BANKA").await, dec!(335000));
    }

    #[tokio::test]
    async fn test_recover_rolls_pending_intent_forward() {
        let h = Harness::new(MemoryStore::without_batches(), quick_config()).await;
        h.store.fail_next_writes("BANKB", 1);
        h.store.fail_writes(keys::PENDING_INTENTS, 1, 1);

        let result = h
            .processor
            .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
            .await;
        assert!(matches!(result, Err(SettleError::PartialCommit { compensated: false, .. })));
        assert_eq!(h.pending_intents().await, 1);

        assert_eq!(h.processor.recover().await.unwrap(), 1);

        assert_eq!(h.balance("BANKA", "BANKB").await, dec!(251000));
        assert_eq!(h.balance("BANKB", "BANKA").await, dec!(333660));
        let journal = h.journal.all().await.unwrap();
        assert_eq!(journal.len(), 1);
        assert!(journal[0].is_completed());
        assert_eq!(h.pending_intents().await, 0);

        assert_eq!(h.processor.recover().await.unwrap(), 0);
        assert_eq!(h.metrics.snapshot().intents_replayed, 1);
    }

    #[tokio::test]
    async fn test_recover_journals_settled_transaction() {
        let h = Harness::new(MemoryStore::without_batches(), quick_config()).await;
        h.store.fail_next_writes(keys::JOURNAL_HEAD, 1);

        let result = h
            .processor
            .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
            .await;
        assert!(matches!(result, Err(SettleError::PartialCommit { compensated: false, .. })));
        assert_eq!(h.journal.len().await.unwrap(), 0);
        assert_eq!(h.pending_intents().await, 1);

        assert_eq!(h.processor.recover().await.unwrap(), 1);

        assert_eq!(h.balance("BANKB", "BANKA").await, dec!(333660));
        assert_eq!(h.journal.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_journal_conflict_after_legs_is_not_retried() {
        let h = Harness::new(MemoryStore::without_batches(), quick_config()).await;
        h.processor
            .settle(&instruction("R0", "USD", "1000000", "BANKA", "BANKB"))
            .await
            .unwrap();
        h.store.interfere_on_get(keys::JOURNAL_HEAD, 5);

        let result = h
            .processor
            .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
            .await;

        assert!(matches!(
            &result,
            Err(e @ SettleError::PartialCommit { compensated: false, .. }) if e.is_ledger_inconsistency()
        ));
        assert_eq!(h.balance("BANKA", "BANKB").await, dec!(251000));
        assert_eq!(h.balance("BANKB", "BANKA").await, dec!(333660));
        assert_eq!(h.journal.len().await.unwrap(), 1);
        assert_eq!(h.pending_intents().await, 1);
        assert_eq!(h.metrics.snapshot().cas_retries, 0);

        assert_eq!(h.processor.recover().await.unwrap(), 1);

        assert_eq!(h.balance("BANKA", "BANKB").await, dec!(251000));
        assert_eq!(h.balance("BANKB", "BANKA").await, dec!(333660));
        let journal = h.journal.all().await.unwrap();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[1].ref_number, "R1");
        assert!(journal[1].is_completed());
        assert_eq!(h.pending_intents().await, 0);
    }

    #[tokio::test]
    async fn test_recover_journals_repeat_of_identical_instruction() {
        let h = Harness::new(MemoryStore::without_batches(), quick_config()).await;
        let first = h
            .processor
            .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
            .await
            .unwrap();

        h.store.fail_next_writes(keys::JOURNAL_HEAD, 1);
        let result = h
            .processor
            .settle(&instruction("R1", "USD", "1000", "BANKA", "BANKB"))
            .await;
        assert!(matches!(result, Err(SettleError::PartialCommit { compensated: false, .. })));

        assert_eq!(h.processor.recover().await.unwrap(), 1);

        let journal = h.journal.all().await.unwrap();
        assert_eq!(journal, vec![first.clone(), first]);
        assert_eq!(h.balance("BANKA", "BANKB").await, dec!(252000));
        assert_eq!(h.balance("BANKB", "BANKA").await, dec!(332320));
    }

    #[tokio::test]
    async fn test_recover_waits_for_in_flight_settlement() {
        let h = Arc::new(Harness::new(MemoryStore::without_batches(), quick_config()).await);
        let (bank_a, bank_b) = (InstitutionId::new("BANKA"), InstitutionId::new("BANKB"));

        // A settlement holding both locks, its intent recorded, no leg written.
        let guard = h.processor.locks.acquire(&bank_a, &bank_b).await;
        let (_, va) = h.directory.load_versioned(&bank_a).await.unwrap();
        let (_, vb) = h.directory.load_versioned(&bank_b).await.unwrap();
        let tx = Transaction::from_instruction(&instruction("R1", "USD", "1000", "BANKA", "BANKB"));
        let intent = SettlementIntent::new(
            tx,
            vec![
                RecordUpdate::new(bank_a.clone(), va).adjust(bank_b.clone(), dec!(1000)),
                RecordUpdate::new(bank_b.clone(), vb).adjust(bank_a.clone(), dec!(-1340)),
            ],
        );
        h.processor.intents.record(&intent).await.unwrap();

        let recovering = {
            let h = h.clone();
            tokio::spawn(async move { h.processor.recover().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!recovering.is_finished());
        assert_eq!(h.balance("BANKB", "BANKA").await, dec!(335000));

        // The settlement gives up cleanly before releasing its locks.
        h.processor.intents.resolve(intent.id).await.unwrap();
        drop(guard);

        assert_eq!(recovering.await.unwrap().unwrap(), 0);
        assert_eq!(h.balance("BANKA", "BANKB").await, dec!(250000));
        assert_eq!(h.balance("BANKB", "BANKA").await, dec!(335000));
        assert_eq!(h.journal.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_amount_beyond_decimal_range_is_rejected() {
        for store in stores() {
            let h = Harness::new(store, quick_config()).await;

            let tx = h
                .processor
                .settle(&instruction("R1", "USD", "79228162514264337593543950335", "BANKA", "BANKB"))
                .await
                .unwrap();

            assert_eq!(tx.status_code, StatusCode::Failed);
            assert_eq!(tx.status_message, "Insufficient funds on Nostro Account");
            assert_eq!(h.balance("BANKA", "BANKB").await, dec!(250000));
            assert_eq!(h.balance("BANKB", "BANKA").await, dec!(335000));
            assert_eq!(h.journal.len().await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_concurrent_settlements_are_serialized() {
        for store in stores() {
            let h = Arc::new(Harness::new(store, quick_config()).await);
            let handles: Vec<_> = (0..40)
                .map(|i| {
                    let h = h.clone();
                    tokio::spawn(async move {
                        let ins = if i % 2 == 0 {
                            instruction(&format!("R{}", i), "USD", "100", "BANKA", "BANKB")
                        } else {
                            instruction(&format!("R{}", i), "AUD", "100", "BANKB", "BANKA")
                        };
                        h.processor.settle(&ins).await
                    })
                })
                .collect();

            for handle in handles {
                assert!(handle.await.unwrap().unwrap().is_completed());
            }

            // 20 × (+100 USD, −134 AUD) and 20 × (+100 AUD, −74 USD)
            assert_eq!(h.balance("BANKA", "BANKB").await, dec!(250000) + dec!(2000) - dec!(1480));
            assert_eq!(h.balance("BANKB", "BANKA").await, dec!(335000) - dec!(2680) + dec!(2000));
            assert_eq!(h.journal.len().await.unwrap(), 40);
            let for_bank_a = h.journal.query_by_participant(&InstitutionId::new("BANKA")).await.unwrap();
            assert_eq!(for_bank_a.len(), 40);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_only_the_two_legs_move(cents in 0u64..50_000_000) {
            tokio_test::block_on(async {
                let h = Harness::new(MemoryStore::new(), quick_config()).await;
                let amount = Decimal::new(cents as i64, 2);

                let tx = h
                    .processor
                    .settle(&instruction("P1", "USD", &amount.to_string(), "BANKA", "BANKB"))
                    .await
                    .unwrap();

                let debit = amount * dec!(1.34);
                if debit <= dec!(335000) {
                    prop_assert!(tx.is_completed());
                    prop_assert_eq!(h.balance("BANKA", "BANKB").await, dec!(250000) + amount);
                    prop_assert_eq!(h.balance("BANKB", "BANKA").await, dec!(335000) - debit);
                } else {
                    prop_assert!(!tx.is_completed());
                    prop_assert_eq!(h.balance("BANKA", "BANKB").await, dec!(250000));
                    prop_assert_eq!(h.balance("BANKB", "BANKA").await, dec!(335000));
                }
                prop_assert_eq!(h.balance("BANKA", "BANKC").await, dec!(360000));
                prop_assert_eq!(h.balance("BANKB", "BANKC").await, dec!(120000));
                prop_assert_eq!(h.balance("BANKC", "BANKA").await, dec!(324000));
                prop_assert_eq!(h.balance("BANKC", "BANKB").await, dec!(80400));
                prop_assert_eq!(h.journal.len().await.unwrap(), 1);
                Ok(())
            })?;
        }
    }
}
