//! Per-institution mutual exclusion for settlements.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use nostrovostro_common::InstitutionId;

/// Locks held for one settlement. Released on drop.
#[derive(Debug)]
pub struct SettlementGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
    institutions: Vec<InstitutionId>,
}

impl SettlementGuard {
    /// Institutions covered, in acquisition order.
    pub fn institutions(&self) -> &[InstitutionId] {
        &self.institutions
    }
}

/// One async mutex per institution id.
#[derive(Debug, Default)]
pub struct InstitutionLockManager {
    locks: DashMap<InstitutionId, Arc<Mutex<()>>>,
}

impl InstitutionLockManager {
    /// Create a new lock manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock both parties of a settlement.
    ///
    /// Ids are locked in sorted order so two settlements between the same
    /// pair can never wait on each other. A self-payment takes one lock.
    pub async fn acquire(&self, sender: &InstitutionId, receiver: &InstitutionId) -> SettlementGuard {
        let mut ids = vec![sender.clone(), receiver.clone()];
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            let lock = self.lock_for(id);
            guards.push(lock.lock_owned().await);
            trace!(institution = %id, "Institution lock acquired");
        }

        SettlementGuard {
            _guards: guards,
            institutions: ids,
        }
    }

    fn lock_for(&self, id: &InstitutionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
