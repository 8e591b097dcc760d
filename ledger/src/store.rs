//! Key-value store seam.
//!
//! The settlement core persists everything through this trait. Durability
//! and replication belong to the implementation. Every stored value carries
//! a store-wide, strictly increasing version so callers can make
//! compare-and-swap writes.

use async_trait::async_trait;
use nostrovostro_common::SettleError;
use thiserror::Error;

/// Store-assigned revision of a value.
pub type Version = u64;

/// A value together with the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub version: Version,
}

/// Precondition on the current state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// No precondition.
    Any,
    /// Key must not exist.
    Absent,
    /// Key must exist at exactly this version.
    Version(Version),
}

impl Expected {
    /// Precondition matching what a read returned.
    pub fn from_read(read: Option<&Versioned>) -> Self {
        match read {
            Some(v) => Expected::Version(v.version),
            None => Expected::Absent,
        }
    }

    /// Whether `current` satisfies this precondition.
    pub fn matches(&self, current: Option<Version>) -> bool {
        match (self, current) {
            (Expected::Any, _) => true,
            (Expected::Absent, None) => true,
            (Expected::Version(want), Some(have)) => *want == have,
            _ => false,
        }
    }
}

/// One write inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put {
        key: String,
        value: Vec<u8>,
        expected: Expected,
    },
    Delete {
        key: String,
        expected: Expected,
    },
}

impl WriteOp {
    /// Key this op touches.
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } => key,
        }
    }

    /// Precondition of this op.
    pub fn expected(&self) -> Expected {
        match self {
            WriteOp::Put { expected, .. } | WriteOp::Delete { expected, .. } => *expected,
        }
    }
}

/// Writes applied all-or-nothing by [`KeyValueStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a put.
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>, expected: Expected) {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value,
            expected,
        });
    }

    /// Add a delete.
    pub fn delete(&mut self, key: impl Into<String>, expected: Expected) {
        self.ops.push(WriteOp::Delete {
            key: key.into(),
            expected,
        });
    }

    /// Ops in insertion order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consume into ops.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    /// Number of ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A precondition did not hold.
    #[error("Version conflict on {key}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        key: String,
        expected: Expected,
        actual: Option<Version>,
    },

    /// The store cannot apply multi-key batches atomically.
    #[error("Store does not support atomic batches")]
    BatchUnsupported,

    /// The store could not serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for SettleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionConflict { key, .. } => SettleError::Conflict(key),
            other => SettleError::Storage(other.to_string()),
        }
    }
}

/// External key-value collaborator.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a key.
    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>>;

    /// Unconditional write. Returns the new version.
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<Version> {
        self.put_if(key, value, Expected::Any).await
    }

    /// Conditional write. Returns the new version.
    async fn put_if(&self, key: &str, value: Vec<u8>, expected: Expected) -> StoreResult<Version>;

    /// Conditional delete.
    async fn delete_if(&self, key: &str, expected: Expected) -> StoreResult<()>;

    /// Whether [`commit`](Self::commit) is available.
    fn supports_batches(&self) -> bool {
        false
    }

    /// Apply a batch atomically: either every precondition holds and every
    /// op is applied, or nothing is.
    async fn commit(&self, _batch: WriteBatch) -> StoreResult<()> {
        Err(StoreError::BatchUnsupported)
    }
}

/// Reserved keys. Institution records live under their bare id, which can
/// never contain `/`.
pub mod keys {
    use nostrovostro_common::{InstitutionId, SequenceNumber};

    /// Persisted roster of registered institutions.
    pub const REGISTRY: &str = "registry";

    /// Last assigned journal sequence number.
    pub const JOURNAL_HEAD: &str = "journal/head";

    /// Single-aggregate journal written by earlier deployments.
    pub const LEGACY_JOURNAL: &str = "allTx";

    /// Pending settlement intents.
    pub const PENDING_INTENTS: &str = "intent/pending";

    /// Key of an institution record.
    pub fn institution(id: &InstitutionId) -> String {
        id.as_str().to_string()
    }

    /// Key of one journal entry.
    pub fn journal_entry(seq: SequenceNumber) -> String {
        format!("journal/entry/{}", seq.padded())
    }

    /// Key of an institution's journal index.
    pub fn journal_index(id: &InstitutionId) -> String {
        format!("journal/index/{}", id)
    }
}
