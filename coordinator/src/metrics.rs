//! Metrics collection for settlement monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Settlement metrics.
pub struct Metrics {
    /// Instructions received.
    pub instructions_submitted: AtomicU64,
    /// Instructions that settled.
    pub instructions_completed: AtomicU64,
    /// Instructions journaled with a validation failure.
    pub instructions_rejected: AtomicU64,
    /// Instructions refused before validation.
    pub instructions_malformed: AtomicU64,
    /// Instructions that failed with a system error.
    pub instructions_errored: AtomicU64,
    /// Settlements where one leg was written and the other was not.
    pub partial_commits: AtomicU64,
    /// Settlement attempts retried after a version conflict.
    pub cas_retries: AtomicU64,
    /// Settlement attempts that timed out.
    pub timeouts: AtomicU64,
    /// Pending intents replayed at startup.
    pub intents_replayed: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            instructions_submitted: AtomicU64::new(0),
            instructions_completed: AtomicU64::new(0),
            instructions_rejected: AtomicU64::new(0),
            instructions_malformed: AtomicU64::new(0),
            instructions_errored: AtomicU64::new(0),
            partial_commits: AtomicU64::new(0),
            cas_retries: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            intents_replayed: AtomicU64::new(0),
        }
    }

    /// Record an instruction received.
    pub fn instruction_submitted(&self) {
        self.instructions_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a settled instruction.
    pub fn instruction_completed(&self) {
        self.instructions_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a validation rejection.
    pub fn instruction_rejected(&self) {
        self.instructions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a malformed instruction.
    pub fn instruction_malformed(&self) {
        self.instructions_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a system error.
    pub fn instruction_errored(&self) {
        self.instructions_errored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a partial commit.
    pub fn partial_commit(&self) {
        self.partial_commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a CAS retry.
    pub fn cas_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an attempt timeout.
    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a replayed intent.
    pub fn intent_replayed(&self) {
        self.intents_replayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            instructions_submitted: self.instructions_submitted.load(Ordering::Relaxed),
            instructions_completed: self.instructions_completed.load(Ordering::Relaxed),
            instructions_rejected: self.instructions_rejected.load(Ordering::Relaxed),
            instructions_malformed: self.instructions_malformed.load(Ordering::Relaxed),
            instructions_errored: self.instructions_errored.load(Ordering::Relaxed),
            partial_commits: self.partial_commits.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            intents_replayed: self.intents_replayed.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("instructions_submitted", "Instructions received", s.instructions_submitted),
            ("instructions_completed", "Instructions settled", s.instructions_completed),
            ("instructions_rejected", "Instructions failing validation", s.instructions_rejected),
            ("instructions_malformed", "Instructions with the wrong field count", s.instructions_malformed),
            ("instructions_errored", "Instructions failing with a system error", s.instructions_errored),
            ("partial_commits", "Settlements whose legs were not all written and journaled", s.partial_commits),
            ("cas_retries", "Settlement attempts retried after a write conflict", s.cas_retries),
            ("timeouts", "Settlement attempts that timed out", s.timeouts),
            ("intents_replayed", "Pending settlement intents replayed", s.intents_replayed),
        ];

        counters
            .iter()
            .map(|(name, help, value)| {
                format!(
                    "# HELP nostrovostro_{name} {help}\n# TYPE nostrovostro_{name} counter\nnostrovostro_{name} {value}\n"
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub instructions_submitted: u64,
    pub instructions_completed: u64,
    pub instructions_rejected: u64,
    pub instructions_malformed: u64,
    pub instructions_errored: u64,
    pub partial_commits: u64,
    pub cas_retries: u64,
    pub timeouts: u64,
    pub intents_replayed: u64,
}

impl MetricsSnapshot {
    /// Instructions that reached validation and were journaled.
    pub fn journaled(&self) -> u64 {
        self.instructions_completed + self.instructions_rejected
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
