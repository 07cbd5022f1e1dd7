//! Segment caller: one upstream call for one work unit, bounded by a deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::cache::SegmentCache;
use crate::error::{DomainError, DomainResult, ResilienceError};
use crate::model::{CallOutcome, EventItem, WorkUnit};
use crate::resilience::RetryExecutor;
use crate::telemetry::{names, MetricsSink, NoopMetrics};

/// The outbound content-generation call.
///
/// Implementations must tolerate being retried for the same unit.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generates the events for one work unit.
    async fn generate(&self, unit: &WorkUnit) -> DomainResult<Vec<EventItem>>;
}

/// Secondary source consulted once the generator has given up.
#[async_trait]
pub trait FallbackSource: Send + Sync {
    /// Produces a degraded payload for `unit`, or fails.
    async fn fallback(&self, unit: &WorkUnit) -> DomainResult<Vec<EventItem>>;
}

/// Invokes the generator for one unit and classifies the result.
///
/// Holds only read-only collaborators, so one instance can serve every
/// worker concurrently.
pub struct SegmentCaller {
    generator: Arc<dyn ContentGenerator>,
    executor: Option<Arc<RetryExecutor>>,
    fallback: Option<Arc<dyn FallbackSource>>,
    cache: Option<Arc<SegmentCache>>,
    metrics: Arc<dyn MetricsSink>,
}

impl SegmentCaller {
    /// Creates a caller that makes exactly one attempt per unit.
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            generator,
            executor: None,
            fallback: None,
            cache: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Routes every call through `executor` for retries and circuit breaking.
    pub fn with_executor(mut self, executor: Arc<RetryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sets the source used when the generator fails for good.
    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Remembers successful payloads in `cache`.
    pub fn with_cache(mut self, cache: Arc<SegmentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Calls the generator for `unit`, giving up after `deadline`.
    ///
    /// Returns `Timeout` when the deadline passes; the unfinished call
    /// (including any pending backoff) is dropped, not awaited. Never
    /// returns an error: failures are part of the outcome.
    #[instrument(skip(self, unit), fields(unit = %unit.id))]
    pub async fn call(&self, unit: &WorkUnit, deadline: Duration) -> CallOutcome {
        let started = Instant::now();
        let result = tokio::time::timeout(deadline, self.attempt(unit)).await;
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(Ok(items)) => CallOutcome::Success { items, elapsed },
            Ok(Err(error)) => {
                warn!(kind = %error.kind(), error = %error, "segment call failed");
                CallOutcome::failure(&error, elapsed)
            }
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "segment call timed out");
                CallOutcome::Timeout { elapsed }
            }
        };

        let label = match &outcome {
            CallOutcome::Success { .. } => "success",
            CallOutcome::Failure { .. } => "failure",
            CallOutcome::Timeout { .. } => "timeout",
        };
        self.metrics
            .record(names::SEGMENT_CALLS_TOTAL, 1.0, &[("outcome", label)]);
        self.metrics.record(
            names::SEGMENT_CALL_DURATION_SECONDS,
            elapsed.as_secs_f64(),
            &[("outcome", label)],
        );
        outcome
    }

    async fn attempt(&self, unit: &WorkUnit) -> DomainResult<Vec<EventItem>> {
        match &self.executor {
            Some(executor) => executor
                .execute(|| self.generate(unit), || self.fall_back(unit))
                .await
                .map_err(|e| match e {
                    ResilienceError::FallbackFailed { primary, .. } => primary,
                    ResilienceError::Cancelled { .. } => DomainError::Cancelled,
                }),
            None => self.generate(unit).await,
        }
    }

    async fn generate(&self, unit: &WorkUnit) -> DomainResult<Vec<EventItem>> {
        let items = self.generator.generate(unit).await?;
        if let Some(cache) = &self.cache {
            cache.insert(unit, items.clone()).await;
        }
        debug!(items = items.len(), "segment generated");
        Ok(items)
    }

    async fn fall_back(&self, unit: &WorkUnit) -> DomainResult<Vec<EventItem>> {
        match &self.fallback {
            Some(fallback) => fallback.fallback(unit).await,
            None => Err(DomainError::other("no fallback source configured")),
        }
    }
}

impl std::fmt::Debug for SegmentCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCaller")
            .field("executor", &self.executor)
            .field("has_fallback", &self.fallback.is_some())
            .field("has_cache", &self.cache.is_some())
            .finish()
    }
}
