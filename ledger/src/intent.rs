//! Write-ahead settlement intents.
//!
//! On stores without atomic batches, a settlement first records what it is
//! about to write. If the process stops between the two legs, the pending
//! intent is replayed forward at startup.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nostrovostro_common::{InstitutionId, InstitutionRecord, Result, SettleError, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::directory::InstitutionDirectory;
use crate::store::{keys, Expected, KeyValueStore, StoreError, Version};

const LOG_ATTEMPTS: u32 = 16;

/// Balance change to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub holder: InstitutionId,
    pub delta: Decimal,
}

/// All changes to one institution record, made against a known version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub institution: InstitutionId,
    /// Version the adjustments were computed against.
    pub base_version: Version,
    pub adjustments: Vec<Adjustment>,
}

impl RecordUpdate {
    /// Start an update against `base_version`.
    pub fn new(institution: InstitutionId, base_version: Version) -> Self {
        Self {
            institution,
            base_version,
            adjustments: Vec::new(),
        }
    }

    /// Add a balance change.
    pub fn adjust(mut self, holder: InstitutionId, delta: Decimal) -> Self {
        self.adjustments.push(Adjustment { holder, delta });
        self
    }

    /// The same update with every delta negated.
    pub fn reversed(&self) -> Self {
        Self {
            institution: self.institution.clone(),
            base_version: self.base_version,
            adjustments: self
                .adjustments
                .iter()
                .map(|a| Adjustment {
                    holder: a.holder.clone(),
                    delta: -a.delta,
                })
                .collect(),
        }
    }

    /// Apply the deltas to a record.
    pub fn apply_to(&self, record: &mut InstitutionRecord) -> Result<()> {
        for adjustment in &self.adjustments {
            let account = record.account_for_mut(&adjustment.holder).ok_or_else(|| {
                SettleError::Storage(format!(
                    "{} holds no account for {}",
                    self.institution, adjustment.holder
                ))
            })?;
            account
                .credit(adjustment.delta)
                .ok_or_else(|| SettleError::BalanceOverflow {
                    owner: self.institution.clone(),
                    holder: adjustment.holder.clone(),
                })?;
        }
        Ok(())
    }
}

/// A settlement in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementIntent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Transaction to journal once both legs are written.
    pub transaction: Transaction,
    pub updates: Vec<RecordUpdate>,
}

impl SettlementIntent {
    /// Create an intent for a transaction.
    pub fn new(transaction: Transaction, updates: Vec<RecordUpdate>) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            transaction,
            updates,
        }
    }
}

/// Pending intents, kept under a single key.
#[derive(Clone)]
pub struct IntentLog {
    store: Arc<dyn KeyValueStore>,
}

impl IntentLog {
    /// Create a log over a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Intents not yet resolved, oldest first.
    pub async fn pending(&self) -> Result<Vec<SettlementIntent>> {
        Ok(self.read().await?.0)
    }

    /// Whether intent `id` is still pending.
    pub async fn is_pending(&self, id: Uuid) -> Result<bool> {
        Ok(self.read().await?.0.iter().any(|i| i.id == id))
    }

    /// Persist an intent.
    pub async fn record(&self, intent: &SettlementIntent) -> Result<()> {
        self.update(|pending| pending.push(intent.clone())).await?;
        debug!(intent = %intent.id, ref_number = %intent.transaction.ref_number, "Intent recorded");
        Ok(())
    }

    /// Remove an intent.
    pub async fn resolve(&self, id: Uuid) -> Result<()> {
        self.update(|pending| pending.retain(|i| i.id != id)).await?;
        debug!(intent = %id, "Intent resolved");
        Ok(())
    }

    /// Write every update of `intent` whose record is still at its base
    /// version. A record that has moved on is taken as already written.
    /// Returns how many updates were applied.
    pub async fn replay_updates(
        &self,
        intent: &SettlementIntent,
        directory: &InstitutionDirectory,
    ) -> Result<usize> {
        let mut applied = 0;
        for update in &intent.updates {
            let (mut record, version) = directory.load_versioned(&update.institution).await?;
            if version != update.base_version {
                debug!(institution = %update.institution, "Update already applied");
                continue;
            }

            update.apply_to(&mut record)?;
            directory
                .save_if(&update.institution, &record, Expected::Version(version))
                .await?;
            applied += 1;
        }

        info!(intent = %intent.id, applied, "Intent replayed");
        Ok(applied)
    }

    async fn read(&self) -> Result<(Vec<SettlementIntent>, Expected)> {
        match self.store.get(keys::PENDING_INTENTS).await? {
            Some(read) => Ok((
                serde_json::from_slice(&read.value)?,
                Expected::Version(read.version),
            )),
            None => Ok((Vec::new(), Expected::Absent)),
        }
    }

    async fn update(&self, change: impl Fn(&mut Vec<SettlementIntent>)) -> Result<()> {
        for attempt in 1..=LOG_ATTEMPTS {
            let (mut pending, expected) = self.read().await?;
            change(&mut pending);
            match self
                .store
                .put_if(keys::PENDING_INTENTS, serde_json::to_vec(&pending)?, expected)
                .await
            {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(attempt, "Intent log update conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SettleError::Conflict(keys::PENDING_INTENTS.to_string()))
    }
}

impl std::fmt::Debug for IntentLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentLog").finish_non_exhaustive()
    }
}
