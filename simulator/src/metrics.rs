//! Simulation metrics.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use simplebank_common::LedgerError;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total transfers attempted.
    pub total_transfers: u64,
    /// Committed transfers.
    pub successful_transfers: u64,
    /// Aborted transfers.
    pub failed_transfers: u64,
    /// Aborted on lock timeout or serialization conflict.
    pub retryable_failures: u64,
    /// Skipped before reaching the engine: the source could not cover them.
    pub rejected_transfers: u64,
    /// Latency samples (µs).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

/// Snapshot printed at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub retryable_failures: u64,
    pub rejected: u64,
    pub success_rate: f64,
    pub p50_latency_us: u64,
    pub p99_latency_us: u64,
    pub throughput_per_sec: f64,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_transfers: 0,
            successful_transfers: 0,
            failed_transfers: 0,
            retryable_failures: 0,
            rejected_transfers: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a committed transfer.
    pub fn record_success(&mut self, latency: Duration) {
        self.total_transfers += 1;
        self.successful_transfers += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples
            .push_back(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX));
    }

    /// Record an aborted transfer.
    pub fn record_failure(&mut self, error: &LedgerError) {
        self.total_transfers += 1;
        self.failed_transfers += 1;
        if error.is_retryable() {
            self.retryable_failures += 1;
        }
    }

    /// Record a transfer the simulator refused to submit.
    pub fn record_rejected(&mut self) {
        self.rejected_transfers += 1;
    }

    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

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

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            return 0.0;
        }

        self.successful_transfers as f64 / self.total_transfers as f64
    }

    /// Transfers attempted per second of wall time.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        if elapsed.is_zero() {
            return 0.0;
        }

        self.total_transfers as f64 / elapsed.as_secs_f64()
    }

    pub fn summary(&self, elapsed: Duration) -> MetricsSummary {
        MetricsSummary {
            total: self.total_transfers,
            successful: self.successful_transfers,
            failed: self.failed_transfers,
            retryable_failures: self.retryable_failures,
            rejected: self.rejected_transfers,
            success_rate: self.success_rate(),
            p50_latency_us: self.p50_latency_us(),
            p99_latency_us: self.p99_latency_us(),
            throughput_per_sec: self.throughput(elapsed),
        }
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
