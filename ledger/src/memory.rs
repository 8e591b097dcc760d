//! In-process key-value stores.

use std::collections::HashMap;
#[cfg(any(test, feature = "test-utils"))]
use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-utils"))]
use parking_lot::Mutex;
use parking_lot::RwLock;

use crate::store::{
    Expected, KeyValueStore, StoreError, StoreResult, Version, Versioned, WriteBatch, WriteOp,
};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Versioned>,
    /// Store-wide revision. Never reused, so a deleted and re-created key
    /// cannot satisfy a stale version check.
    revision: Version,
}

impl Inner {
    fn current(&self, key: &str) -> Option<Version> {
        self.entries.get(key).map(|v| v.version)
    }

    fn check(&self, key: &str, expected: Expected) -> StoreResult<()> {
        let actual = self.current(key);
        if expected.matches(actual) {
            Ok(())
        } else {
            Err(StoreError::VersionConflict {
                key: key.to_string(),
                expected,
                actual,
            })
        }
    }

    fn apply(&mut self, op: WriteOp) -> Version {
        self.revision += 1;
        match op {
            WriteOp::Put { key, value, .. } => {
                self.entries.insert(
                    key,
                    Versioned {
                        value,
                        version: self.revision,
                    },
                );
            }
            WriteOp::Delete { key, .. } => {
                self.entries.remove(&key);
            }
        }
        self.revision
    }
}

/// Thread-safe in-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    batches: bool,
}

impl MemoryStore {
    /// Create an empty store with atomic batch support.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            batches: true,
        }
    }

    /// Create an empty store that only offers single-key writes.
    pub fn without_batches() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            batches: false,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>> {
        Ok(self.inner.read().entries.get(key).cloned())
    }

    async fn put_if(&self, key: &str, value: Vec<u8>, expected: Expected) -> StoreResult<Version> {
        let mut inner = self.inner.write();
        inner.check(key, expected)?;
        Ok(inner.apply(WriteOp::Put {
            key: key.to_string(),
            value,
            expected,
        }))
    }

    async fn delete_if(&self, key: &str, expected: Expected) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.check(key, expected)?;
        inner.apply(WriteOp::Delete {
            key: key.to_string(),
            expected,
        });
        Ok(())
    }

    fn supports_batches(&self) -> bool {
        self.batches
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if !self.batches {
            return Err(StoreError::BatchUnsupported);
        }

        let mut inner = self.inner.write();
        for op in batch.ops() {
            inner.check(op.key(), op.expected())?;
        }
        for op in batch.into_ops() {
            inner.apply(op);
        }
        Ok(())
    }
}

/// Store wrapper that injects failures, latency and concurrent writers.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct FaultyStore {
    inner: MemoryStore,
    failing_writes: Mutex<HashMap<String, (u32, u32)>>,
    interference: Mutex<HashMap<String, u32>>,
    get_delay: Mutex<Option<Duration>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl FaultyStore {
    /// Wrap a store.
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing_writes: Mutex::new(HashMap::new()),
            interference: Mutex::new(HashMap::new()),
            get_delay: Mutex::new(None),
        }
    }

    /// Fail the next `times` writes (single or batched) touching `key`.
    pub fn fail_next_writes(&self, key: impl Into<String>, times: u32) {
        self.fail_writes(key, 0, times);
    }

    /// Let `skip` writes touching `key` through, then fail the next `times`.
    pub fn fail_writes(&self, key: impl Into<String>, skip: u32, times: u32) {
        self.failing_writes.lock().insert(key.into(), (skip, times));
    }

    /// After each of the next `times` reads of `key`, rewrite it so the
    /// version the reader saw is stale.
    pub fn interfere_on_get(&self, key: impl Into<String>, times: u32) {
        self.interference.lock().insert(key.into(), times);
    }

    /// Delay every read.
    pub fn set_get_delay(&self, delay: Option<Duration>) {
        *self.get_delay.lock() = delay;
    }

    fn take(counter: &Mutex<HashMap<String, u32>>, key: &str) -> bool {
        let mut map = counter.lock();
        match map.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn should_fail(&self, key: &str) -> bool {
        let mut map = self.failing_writes.lock();
        match map.get_mut(key) {
            Some((skip, _)) if *skip > 0 => {
                *skip -= 1;
                false
            }
            Some((_, times)) if *times > 0 => {
                *times -= 1;
                true
            }
            _ => false,
        }
    }

    fn injected(key: &str) -> StoreError {
        StoreError::Unavailable(format!("injected write failure on {}", key))
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl KeyValueStore for FaultyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>> {
        let delay = *self.get_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let read = self.inner.get(key).await?;
        if let Some(current) = &read {
            if Self::take(&self.interference, key) {
                self.inner.put(key, current.value.clone()).await?;
            }
        }
        Ok(read)
    }

    async fn put_if(&self, key: &str, value: Vec<u8>, expected: Expected) -> StoreResult<Version> {
        if self.should_fail(key) {
            return Err(Self::injected(key));
        }
        self.inner.put_if(key, value, expected).await
    }

    async fn delete_if(&self, key: &str, expected: Expected) -> StoreResult<()> {
        if self.should_fail(key) {
            return Err(Self::injected(key));
        }
        self.inner.delete_if(key, expected).await
    }

    fn supports_batches(&self) -> bool {
        self.inner.supports_batches()
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if let Some(op) = batch
            .ops()
            .iter()
            .find(|op| self.should_fail(op.key()))
        {
            return Err(Self::injected(op.key()));
        }
        self.inner.commit(batch).await
    }
}
