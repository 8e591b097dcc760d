//! Institution directory.
//!
//! Typed access to institution records, keyed by institution id, plus the
//! persisted roster of every registered institution.

use std::sync::Arc;

use nostrovostro_common::{InstitutionId, InstitutionRecord, Result, SettleError};
use tracing::{debug, info, instrument, warn};

use crate::store::{keys, Expected, KeyValueStore, StoreError, Version, WriteBatch};

/// Upper bound on registry update attempts under contention.
const REGISTRY_ATTEMPTS: u32 = 16;

/// Typed wrapper over the store for institution records.
#[derive(Clone)]
pub struct InstitutionDirectory {
    store: Arc<dyn KeyValueStore>,
}

impl InstitutionDirectory {
    /// Create a directory over a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Load an institution record.
    pub async fn load(&self, id: &InstitutionId) -> Result<InstitutionRecord> {
        self.load_versioned(id).await.map(|(record, _)| record)
    }

    /// Load an institution record together with its store version.
    pub async fn load_versioned(&self, id: &InstitutionId) -> Result<(InstitutionRecord, Version)> {
        let read = self
            .store
            .get(&keys::institution(id))
            .await?
            .ok_or_else(|| SettleError::InstitutionNotFound(id.clone()))?;

        let record: InstitutionRecord = serde_json::from_slice(&read.value)?;
        debug!(institution = %id, version = read.version, "Loaded institution record");
        Ok((record, read.version))
    }

    /// Write a record unconditionally.
    pub async fn save(&self, id: &InstitutionId, record: &InstitutionRecord) -> Result<Version> {
        self.save_if(id, record, Expected::Any).await
    }

    /// Write a record if the stored version still matches `expected`.
    pub async fn save_if(
        &self,
        id: &InstitutionId,
        record: &InstitutionRecord,
        expected: Expected,
    ) -> Result<Version> {
        let value = Self::encode(record)?;
        let version = self
            .store
            .put_if(&keys::institution(id), value, expected)
            .await?;
        debug!(institution = %id, version, "Saved institution record");
        Ok(version)
    }

    /// Stage a record write into a batch.
    pub fn stage(
        &self,
        batch: &mut WriteBatch,
        id: &InstitutionId,
        record: &InstitutionRecord,
        expected: Expected,
    ) -> Result<()> {
        batch.put(keys::institution(id), Self::encode(record)?, expected);
        Ok(())
    }

    /// Register a new institution.
    #[instrument(skip(self, record), fields(institution = %record.owner))]
    pub async fn create(&self, record: &InstitutionRecord) -> Result<Version> {
        let id = &record.owner;
        if !id.is_valid() {
            return Err(SettleError::InvalidInstitutionId(id.to_string()));
        }

        let value = Self::encode(record)?;
        let version = match self
            .store
            .put_if(&keys::institution(id), value, Expected::Absent)
            .await
        {
            Ok(version) => version,
            Err(StoreError::VersionConflict { .. }) => {
                return Err(SettleError::InstitutionExists(id.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        self.register(id).await?;

        info!(accounts = record.accounts.len(), "Institution created");
        Ok(version)
    }

    /// All registered institutions in registration order.
    pub async fn roster(&self) -> Result<Vec<InstitutionId>> {
        match self.store.get(keys::REGISTRY).await? {
            Some(read) => Ok(serde_json::from_slice(&read.value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Add an id to the roster. Idempotent.
    pub async fn register(&self, id: &InstitutionId) -> Result<()> {
        for attempt in 1..=REGISTRY_ATTEMPTS {
            let read = self.store.get(keys::REGISTRY).await?;
            let expected = Expected::from_read(read.as_ref());
            let mut roster: Vec<InstitutionId> = match &read {
                Some(r) => serde_json::from_slice(&r.value)?,
                None => Vec::new(),
            };

            if roster.contains(id) {
                return Ok(());
            }
            roster.push(id.clone());

            match self
                .store
                .put_if(keys::REGISTRY, serde_json::to_vec(&roster)?, expected)
                .await
            {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(institution = %id, attempt, "Registry update conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SettleError::Conflict(keys::REGISTRY.to_string()))
    }

    fn encode(record: &InstitutionRecord) -> Result<Vec<u8>> {
        if let Some(holder) = record.duplicate_holder() {
            return Err(SettleError::DuplicateRelationship {
                owner: record.owner.clone(),
                holder: holder.clone(),
            });
        }
        Ok(serde_json::to_vec(record)?)
    }
}

impl std::fmt::Debug for InstitutionDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstitutionDirectory").finish_non_exhaustive()
    }
}
