//! Batch coordinator implementation.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use timeweave_domain::model::{CallOutcome, WorkUnit};
use timeweave_domain::telemetry::{MetricsSink, NoopMetrics};
use timeweave_domain::{DomainError, ErrorKind, SegmentCaller};

use super::merge::merge_outcomes;
use super::pool::WorkerPool;
use super::stats::CoordinatorStats;
use super::types::{
    BatchResult, CoordinatorConfig, CoordinatorError, CoordinatorResult, CoordinatorStatistics,
};
use crate::observability::names;

/// Runs a batch of work units concurrently and merges their payloads.
///
/// One coordinator is meant to be shared (behind `Arc`) by every request;
/// the worker pool, and therefore the concurrency bound, is shared too.
///
/// A unit never fails the batch: timeouts, errors, panics and cancellation
/// are classified into its outcome and counted. Callers inspect
/// [`BatchResult::counters`] to detect degraded results.
///
/// Unit tasks are bound to their batch: dropping a batch future before it
/// resolves cancels every unit it submitted.
pub struct BatchCoordinator {
    caller: Arc<SegmentCaller>,
    pool: RwLock<Arc<WorkerPool>>,
    queue_factor: usize,
    concurrency: AtomicUsize,
    timeout_ms: AtomicU64,
    stats: Arc<CoordinatorStats>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: CancellationToken,
}

impl BatchCoordinator {
    /// Creates a coordinator, validating `config`.
    pub fn new(caller: Arc<SegmentCaller>, config: CoordinatorConfig) -> CoordinatorResult<Self> {
        config.validate()?;
        Ok(Self {
            caller,
            pool: RwLock::new(Arc::new(WorkerPool::new(
                config.concurrency,
                config.queue_factor,
            ))),
            queue_factor: config.queue_factor,
            concurrency: AtomicUsize::new(config.concurrency),
            timeout_ms: AtomicU64::new(config.call_timeout.as_millis() as u64),
            stats: Arc::new(CoordinatorStats::default()),
            metrics: Arc::new(NoopMetrics),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current per-unit deadline.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::SeqCst)
    }

    /// Executes every unit and returns the merged result.
    pub async fn execute_batch(&self, units: Vec<WorkUnit>) -> BatchResult {
        self.execute_batch_with_cancel(units, CancellationToken::new())
            .await
    }

    /// Executes every unit, abandoning outstanding ones when `cancel` fires.
    ///
    /// Cancelled units report a `Failure` of kind `CANCELLED`; units that
    /// already finished keep their outcome. [`shutdown`](Self::shutdown)
    /// and dropping the returned future cancel the units the same way.
    #[instrument(skip(self, units, cancel), fields(units = units.len()))]
    pub async fn execute_batch_with_cancel(
        &self,
        units: Vec<WorkUnit>,
        cancel: CancellationToken,
    ) -> BatchResult {
        if units.is_empty() {
            debug!("empty batch");
            return BatchResult::default();
        }

        let started = Instant::now();
        let timeout = self.call_timeout();
        let batch = self.shutdown.child_token();
        let _abandon = batch.clone().drop_guard();
        let mut finished: Vec<(usize, CallOutcome)> = Vec::with_capacity(units.len());
        let mut pending = Vec::with_capacity(units.len());

        {
            // Held for the whole submission so `set_concurrency` cannot swap
            // the pool underneath a half-submitted batch.
            let pool = self.pool.read().await;
            for (position, unit) in units.into_iter().enumerate() {
                let task = self.unit_task(unit, timeout, batch.clone(), cancel.clone());
                match pool.try_spawn(task) {
                    Ok(handle) => pending.push((position, handle)),
                    Err(task) => {
                        debug!(position, "worker queue full, running unit on submitter");
                        let outcome = AssertUnwindSafe(task)
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| panicked_outcome(position));
                        finished.push((position, outcome));
                    }
                }
            }
        }

        let joined = join_all(
            pending
                .into_iter()
                .map(|(position, handle)| async move { (position, handle.await) }),
        )
        .await;
        for (position, joined) in joined {
            let outcome = joined.unwrap_or_else(|_| panicked_outcome(position));
            finished.push((position, outcome));
        }
        finished.sort_by_key(|(position, _)| *position);

        let (items, counters) = merge_outcomes(finished.into_iter().map(|(_, outcome)| outcome));
        let elapsed = started.elapsed();
        self.stats.record_batch(&counters, elapsed);

        self.metrics.record(
            names::BATCH_DURATION_SECONDS,
            elapsed.as_secs_f64(),
            &[],
        );
        for (label, count) in [
            ("success", counters.succeeded),
            ("failure", counters.failed),
            ("timeout", counters.timed_out),
        ] {
            if count > 0 {
                self.metrics
                    .record(names::BATCH_UNITS_TOTAL, count as f64, &[("outcome", label)]);
            }
        }

        info!(
            attempted = counters.attempted,
            succeeded = counters.succeeded,
            failed = counters.failed,
            timed_out = counters.timed_out,
            items = items.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "batch completed"
        );

        BatchResult {
            items,
            counters,
            elapsed,
        }
    }

    fn unit_task(
        &self,
        unit: WorkUnit,
        timeout: Duration,
        batch: CancellationToken,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = CallOutcome> + Send + 'static {
        let caller = Arc::clone(&self.caller);
        let stats = Arc::clone(&self.stats);
        let metrics = Arc::clone(&self.metrics);
        async move {
            let _active = ActiveUnit::enter(stats, metrics);
            let started = Instant::now();
            tokio::select! {
                biased;
                _ = batch.cancelled() => {
                    debug!(unit = %unit.id, "unit abandoned with its batch");
                    CallOutcome::failure(&DomainError::Cancelled, started.elapsed())
                }
                _ = cancel.cancelled() => {
                    debug!(unit = %unit.id, "unit cancelled");
                    CallOutcome::failure(&DomainError::Cancelled, started.elapsed())
                }
                outcome = caller.call(&unit, timeout) => outcome,
            }
        }
    }

    /// Changes the worker pool size.
    ///
    /// New submissions wait while the old pool drains; tasks already
    /// admitted run to completion on the old pool.
    #[instrument(skip(self))]
    pub async fn set_concurrency(&self, concurrency: usize) -> CoordinatorResult<()> {
        if concurrency == 0 {
            return Err(CoordinatorError::InvalidConcurrency { value: concurrency });
        }

        let mut pool = self.pool.write().await;
        if pool.concurrency() == concurrency {
            return Ok(());
        }
        pool.drain().await;
        *pool = Arc::new(WorkerPool::new(concurrency, self.queue_factor));
        self.concurrency.store(concurrency, Ordering::SeqCst);
        info!(concurrency, "worker pool resized");
        Ok(())
    }

    /// Changes the per-unit deadline for batches started afterwards.
    pub fn set_timeout(&self, timeout: Duration) -> CoordinatorResult<()> {
        if timeout.is_zero() {
            return Err(CoordinatorError::InvalidTimeout { value_ms: 0 });
        }
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
        info!(timeout_ms = timeout.as_millis() as u64, "call timeout updated");
        Ok(())
    }

    /// Cancels every outstanding unit of every batch.
    ///
    /// Batches started afterwards report all their units as cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        info!(
            active_units = self.stats.active(),
            "batch coordinator shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn statistics(&self) -> CoordinatorStatistics {
        self.stats.snapshot(self.concurrency(), self.call_timeout())
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("concurrency", &self.concurrency())
            .field("call_timeout", &self.call_timeout())
            .field("queue_factor", &self.queue_factor)
            .finish_non_exhaustive()
    }
}

fn panicked_outcome(position: usize) -> CallOutcome {
    error!(position, "unit task panicked");
    CallOutcome::Failure {
        kind: ErrorKind::Unknown,
        message: "unit task panicked".to_string(),
        elapsed: Duration::ZERO,
    }
}

/// Keeps the active-unit gauge accurate for the life of one unit task.
struct ActiveUnit {
    stats: Arc<CoordinatorStats>,
    metrics: Arc<dyn MetricsSink>,
}

impl ActiveUnit {
    fn enter(stats: Arc<CoordinatorStats>, metrics: Arc<dyn MetricsSink>) -> Self {
        let active = stats.unit_started();
        metrics.record(names::ACTIVE_UNITS_CURRENT, active as f64, &[]);
        Self { stats, metrics }
    }
}

impl Drop for ActiveUnit {
    fn drop(&mut self) {
        let active = self.stats.unit_finished();
        self.metrics
            .record(names::ACTIVE_UNITS_CURRENT, active as f64, &[]);
    }
}
