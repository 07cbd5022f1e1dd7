//! Concurrent batch coordinator.
//!
//! Executes the work units of one timeline request on a shared, bounded
//! worker pool and folds their outcomes into a single ordered result:
//!
//! 1. **Bounded execution**: at most `concurrency` units run at once, with a
//!    queue of `queue_factor * concurrency`; beyond that the submitting task
//!    runs units itself (caller-runs backpressure)
//! 2. **Hard deadlines**: every unit call is abandoned after the per-unit
//!    timeout, so a batch takes roughly one timeout no matter how many
//!    units hang
//! 3. **Deterministic merge**: payloads are concatenated in unit order,
//!    deduplicated on (title, timestamp, location) and stably sorted by
//!    timestamp, independent of completion order

mod coordinator;
mod merge;
mod pool;
mod stats;
mod types;

pub use coordinator::BatchCoordinator;
pub use types::{
    BatchCounters, BatchResult, CoordinatorConfig, CoordinatorError, CoordinatorResult,
    CoordinatorStatistics, DEFAULT_CALL_TIMEOUT, DEFAULT_CONCURRENCY, DEFAULT_QUEUE_FACTOR,
    RECENT_DURATIONS,
};
