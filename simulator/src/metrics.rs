//! Simulation metrics.

use std::collections::VecDeque;
use std::time::Duration;

/// Outcome counts and submission latencies.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Instructions that settled.
    pub completed: u64,
    /// Instructions journaled with a validation failure.
    pub rejected: u64,
    /// Instructions refused with an error.
    pub errored: u64,
    /// Latency samples (µs) of journaled submissions.
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            completed: 0,
            rejected: 0,
            errored: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a settled instruction.
    pub fn record_completed(&mut self, latency: Duration) {
        self.completed += 1;
        self.sample(latency);
    }

    /// Record a rejected instruction.
    pub fn record_rejected(&mut self, latency: Duration) {
        self.rejected += 1;
        self.sample(latency);
    }

    /// Record a submission error.
    pub fn record_error(&mut self) {
        self.errored += 1;
    }

    /// All submissions.
    pub fn total(&self) -> u64 {
        self.completed + self.rejected + self.errored
    }

    fn sample(&mut self, latency: Duration) {
        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples
            .push_back(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX));
    }

    /// Get average latency in µs.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Share of submissions that settled.
    pub fn completion_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }

        self.completed as f64 / self.total() as f64
    }

    /// Submissions per second over `elapsed`.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        if elapsed.is_zero() {
            return 0.0;
        }

        self.total() as f64 / elapsed.as_secs_f64()
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
