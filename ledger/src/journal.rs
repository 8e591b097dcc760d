//! Append-only transaction journal.
//!
//! Every instruction that reaches validation is recorded here, settled or
//! not. Entries live under one key per sequence number; a per-institution
//! index lists the sequence numbers each institution took part in, so
//! history queries never scan the whole journal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nostrovostro_common::{InstitutionId, Result, SequenceNumber, SettleError, Transaction};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::store::{keys, Expected, KeyValueStore, StoreError, WriteBatch};

/// Attempts at claiming a sequence number when another writer shares the
/// store.
const APPEND_ATTEMPTS: u32 = 5;

/// One journaled transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the journal, starting at 1.
    pub seq: SequenceNumber,
    /// When the entry was appended.
    pub recorded_at: DateTime<Utc>,
    /// The transaction as journaled.
    pub transaction: Transaction,
    /// Settlement intent the entry completes, on stores without batches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Uuid>,
}

/// Layout of the single-aggregate journal kept by earlier deployments.
#[derive(Debug, Deserialize)]
struct LegacyJournal {
    #[serde(default)]
    transactions: Vec<Transaction>,
}

/// Journal over a key-value store.
pub struct TransactionJournal {
    store: Arc<dyn KeyValueStore>,
    auditor: InstitutionId,
    append_lock: Mutex<()>,
}

impl TransactionJournal {
    /// Create a journal. Queries by `auditor` return the whole journal.
    pub fn new(store: Arc<dyn KeyValueStore>, auditor: InstitutionId) -> Self {
        Self {
            store,
            auditor,
            append_lock: Mutex::new(()),
        }
    }

    /// The audit-role id.
    pub fn auditor(&self) -> &InstitutionId {
        &self.auditor
    }

    /// Number of journaled transactions.
    pub async fn len(&self) -> Result<u64> {
        Ok(self.head().await?.0)
    }

    /// Whether nothing has been journaled.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Append a transaction on its own.
    #[instrument(skip(self, tx), fields(ref_number = %tx.ref_number))]
    pub async fn append(&self, tx: &Transaction) -> Result<SequenceNumber> {
        self.append_tagged(tx, None).await
    }

    /// Append the transaction that completes settlement intent `intent`.
    /// The entry remembers the intent, see [`Self::contains_intent`].
    #[instrument(skip(self, tx), fields(ref_number = %tx.ref_number))]
    pub async fn append_for_intent(&self, tx: &Transaction, intent: Uuid) -> Result<SequenceNumber> {
        self.append_tagged(tx, Some(intent)).await
    }

    async fn append_tagged(&self, tx: &Transaction, intent: Option<Uuid>) -> Result<SequenceNumber> {
        let _guard = self.append_lock.lock().await;

        for attempt in 1..=APPEND_ATTEMPTS {
            let result = if self.store.supports_batches() {
                self.commit_with(tx, intent, WriteBatch::new()).await
            } else {
                self.append_unbatched(tx, intent).await
            };
            match result {
                Err(SettleError::Conflict(key)) if key == keys::JOURNAL_HEAD => {
                    warn!(attempt, "Journal head moved, retrying append");
                }
                other => return other,
            }
        }

        Err(SettleError::Conflict(keys::JOURNAL_HEAD.to_string()))
    }

    /// Append a transaction in the same atomic batch as `writes`.
    ///
    /// Requires a store with batch support. A version conflict on any key,
    /// journal or caller-supplied, rejects the whole batch with
    /// [`SettleError::Conflict`].
    #[instrument(skip(self, tx, writes), fields(ref_number = %tx.ref_number))]
    pub async fn append_with(&self, tx: &Transaction, writes: WriteBatch) -> Result<SequenceNumber> {
        if !self.store.supports_batches() {
            return Err(StoreError::BatchUnsupported.into());
        }
        let _guard = self.append_lock.lock().await;
        self.commit_with(tx, None, writes).await
    }

    async fn commit_with(
        &self,
        tx: &Transaction,
        intent: Option<Uuid>,
        writes: WriteBatch,
    ) -> Result<SequenceNumber> {
        let (last, head_expected) = self.head().await?;
        let seq = SequenceNumber::new(last).next();

        let mut batch = writes;
        batch.put(
            keys::JOURNAL_HEAD,
            serde_json::to_vec(&seq)?,
            head_expected,
        );
        batch.put(
            keys::journal_entry(seq),
            serde_json::to_vec(&Self::entry(seq, tx, intent))?,
            Expected::Absent,
        );
        for participant in Self::participants(tx) {
            let (mut index, expected) = self.index(participant).await?;
            index.push(seq);
            batch.put(
                keys::journal_index(participant),
                serde_json::to_vec(&index)?,
                expected,
            );
        }

        self.store.commit(batch).await?;
        debug!(seq = %seq, "Journal entry committed");
        Ok(seq)
    }

    /// Head first, then entry, then indices. A reader that sees the head
    /// before the entry lands treats the slot as a gap.
    async fn append_unbatched(&self, tx: &Transaction, intent: Option<Uuid>) -> Result<SequenceNumber> {
        let (last, head_expected) = self.head().await?;
        let seq = SequenceNumber::new(last).next();

        self.store
            .put_if(keys::JOURNAL_HEAD, serde_json::to_vec(&seq)?, head_expected)
            .await?;
        self.store
            .put_if(
                &keys::journal_entry(seq),
                serde_json::to_vec(&Self::entry(seq, tx, intent))?,
                Expected::Absent,
            )
            .await?;

        for participant in Self::participants(tx) {
            self.push_index(participant, seq).await?;
        }

        debug!(seq = %seq, "Journal entry written");
        Ok(seq)
    }

    async fn push_index(&self, id: &InstitutionId, seq: SequenceNumber) -> Result<()> {
        for _ in 0..APPEND_ATTEMPTS {
            let (mut index, expected) = self.index(id).await?;
            index.push(seq);
            match self
                .store
                .put_if(&keys::journal_index(id), serde_json::to_vec(&index)?, expected)
                .await
            {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(SettleError::Conflict(keys::journal_index(id)))
    }

    /// Entry at `seq`, if present.
    pub async fn get(&self, seq: SequenceNumber) -> Result<Option<JournalEntry>> {
        match self.store.get(&keys::journal_entry(seq)).await? {
            Some(read) => Ok(Some(serde_json::from_slice(&read.value)?)),
            None => Ok(None),
        }
    }

    /// Every transaction in journal order.
    pub async fn all(&self) -> Result<Vec<Transaction>> {
        let (last, _) = self.head().await?;
        let mut out = Vec::with_capacity(last as usize);
        for n in 1..=last {
            match self.get(SequenceNumber::new(n)).await? {
                Some(entry) => out.push(entry.transaction),
                None => warn!(seq = n, "Journal gap"),
            }
        }
        Ok(out)
    }

    /// Transactions where `id` is sender or receiver, in journal order; the
    /// whole journal for the audit-role id.
    #[instrument(skip(self))]
    pub async fn query_by_participant(&self, id: &InstitutionId) -> Result<Vec<Transaction>> {
        if id == &self.auditor {
            return self.all().await;
        }

        let (index, _) = self.index(id).await?;
        let mut out = Vec::with_capacity(index.len());
        for seq in index {
            match self.get(seq).await? {
                Some(entry) => out.push(entry.transaction),
                None => warn!(seq = %seq, "Indexed journal entry missing"),
            }
        }
        Ok(out)
    }

    /// Whether an entry completing settlement intent `intent` is indexed
    /// under `participant`.
    pub async fn contains_intent(&self, participant: &InstitutionId, intent: Uuid) -> Result<bool> {
        let (index, _) = self.index(participant).await?;
        for seq in index.into_iter().rev() {
            if let Some(entry) = self.get(seq).await? {
                if entry.intent == Some(intent) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Move transactions from the legacy `allTx` aggregate into the journal,
    /// in their original order, then remove the aggregate. Returns how many
    /// were imported.
    #[instrument(skip(self))]
    pub async fn import_legacy(&self) -> Result<usize> {
        let Some(read) = self.store.get(keys::LEGACY_JOURNAL).await? else {
            return Ok(0);
        };

        let legacy: LegacyJournal = serde_json::from_slice(&read.value)?;
        let count = legacy.transactions.len();
        for tx in &legacy.transactions {
            self.append(tx).await?;
        }

        self.store
            .delete_if(keys::LEGACY_JOURNAL, Expected::Version(read.version))
            .await?;

        info!(count, "Imported legacy journal");
        Ok(count)
    }

    async fn head(&self) -> Result<(u64, Expected)> {
        match self.store.get(keys::JOURNAL_HEAD).await? {
            Some(read) => {
                let seq: SequenceNumber = serde_json::from_slice(&read.value)?;
                Ok((seq.value(), Expected::Version(read.version)))
            }
            None => Ok((0, Expected::Absent)),
        }
    }

    async fn index(&self, id: &InstitutionId) -> Result<(Vec<SequenceNumber>, Expected)> {
        match self.store.get(&keys::journal_index(id)).await? {
            Some(read) => Ok((
                serde_json::from_slice(&read.value)?,
                Expected::Version(read.version),
            )),
            None => Ok((Vec::new(), Expected::Absent)),
        }
    }

    fn entry(seq: SequenceNumber, tx: &Transaction, intent: Option<Uuid>) -> JournalEntry {
        JournalEntry {
            seq,
            recorded_at: Utc::now(),
            transaction: tx.clone(),
            intent,
        }
    }

    fn participants(tx: &Transaction) -> Vec<&InstitutionId> {
        if tx.sender == tx.receiver {
            vec![&tx.sender]
        } else {
            vec![&tx.sender, &tx.receiver]
        }
    }
}

impl std::fmt::Debug for TransactionJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionJournal")
            .field("auditor", &self.auditor)
            .finish_non_exhaustive()
    }
}
