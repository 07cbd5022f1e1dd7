//! Data types for batch execution.

use std::time::Duration;

use serde::Serialize;

use timeweave_domain::model::EventItem;

/// Default worker pool concurrency.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default hard per-unit timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Queue depth as a multiple of the concurrency level.
pub const DEFAULT_QUEUE_FACTOR: usize = 10;

/// Number of recent batch durations kept for percentile reporting.
pub const RECENT_DURATIONS: usize = 100;

/// Configuration for the batch coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Units executing at once.
    pub concurrency: usize,
    /// Hard deadline applied to every unit call.
    pub call_timeout: Duration,
    /// Queued units per worker before the submitter runs units itself.
    pub queue_factor: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            queue_factor: DEFAULT_QUEUE_FACTOR,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_queue_factor(mut self, queue_factor: usize) -> Self {
        self.queue_factor = queue_factor;
        self
    }

    /// Rejects zero concurrency or a zero timeout.
    pub fn validate(&self) -> CoordinatorResult<()> {
        if self.concurrency == 0 {
            return Err(CoordinatorError::InvalidConcurrency {
                value: self.concurrency,
            });
        }
        if self.call_timeout.is_zero() {
            return Err(CoordinatorError::InvalidTimeout {
                value_ms: self.call_timeout.as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// Per-batch outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounters {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Merged result of one batch.
///
/// Items are deduplicated on (title, timestamp, location) and ordered by
/// timestamp; the order does not depend on which unit finished first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub items: Vec<EventItem>,
    pub counters: BatchCounters,
    /// Wall time of the batch. Not serialized.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl BatchResult {
    /// True when at least one unit did not succeed.
    pub fn is_degraded(&self) -> bool {
        self.counters.succeeded < self.counters.attempted
    }
}

/// Snapshot of the coordinator's lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinatorStatistics {
    pub total_batches: u64,
    pub total_units: u64,
    pub succeeded_units: u64,
    pub failed_units: u64,
    pub timed_out_units: u64,
    /// Units currently executing.
    pub active_units: u64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub timeout_rate: f64,
    /// Statistics over the most recent batch durations, in milliseconds.
    pub recent_avg_ms: f64,
    pub recent_min_ms: u64,
    pub recent_max_ms: u64,
    pub recent_p50_ms: u64,
    pub recent_p95_ms: u64,
    pub concurrency: usize,
    pub call_timeout_ms: u64,
}

/// Errors raised by the coordinator's configuration surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// Concurrency must be positive.
    #[error("concurrency must be greater than 0, got {value}")]
    InvalidConcurrency { value: usize },

    /// Per-unit timeout must be positive.
    #[error("call timeout must be greater than 0, got {value_ms}ms")]
    InvalidTimeout { value_ms: u64 },
}

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
