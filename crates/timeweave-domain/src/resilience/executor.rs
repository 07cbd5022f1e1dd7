//! Retry/fallback executor.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::{should_retry, RetryPolicy};
use super::circuit::{Admission, CircuitBreaker};
use crate::error::{DomainError, DomainResult, ErrorKind, ResilienceError};
use crate::telemetry::{names, MetricsSink, NoopMetrics};

/// Snapshot of executor counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorStatistics {
    pub total_errors: u64,
    pub retryable_errors: u64,
    pub non_retryable_errors: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub fallback_executions: u64,
    /// `successful / (successful + failed)` retries, 0 when none happened.
    pub retry_success_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    total_errors: AtomicU64,
    retryable_errors: AtomicU64,
    non_retryable_errors: AtomicU64,
    successful_retries: AtomicU64,
    failed_retries: AtomicU64,
    fallback_executions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Half-open probes held by a single attempt.
///
/// A set dropped before it is settled belongs to an attempt that was
/// abandoned (deadline or cancellation); each of its probes counts as a
/// failure, re-opening the circuit and restarting its timeout.
struct ProbeSet<'a> {
    breaker: Option<&'a CircuitBreaker>,
    keys: Vec<&'static str>,
}

impl ProbeSet<'_> {
    fn empty() -> Self {
        Self {
            breaker: None,
            keys: Vec::new(),
        }
    }

    /// Reports the attempt's result to every held probe.
    ///
    /// A probe fails only when the error falls in its own class; otherwise
    /// it is handed back unused.
    fn settle(&mut self, failed: Option<ErrorKind>) {
        let Some(breaker) = self.breaker else {
            return;
        };
        for key in self.keys.drain(..) {
            match failed {
                None => breaker.record_success(key),
                Some(kind) if kind.as_str() == key => {}
                Some(_) => breaker.release_probe(key),
            }
        }
    }

    /// Hands every probe back without a verdict.
    fn release(&mut self) {
        let Some(breaker) = self.breaker else {
            return;
        };
        for key in self.keys.drain(..) {
            breaker.release_probe(key);
        }
    }
}

impl Drop for ProbeSet<'_> {
    fn drop(&mut self) {
        let Some(breaker) = self.breaker else {
            return;
        };
        for key in self.keys.drain(..) {
            warn!(key, "half-open probe abandoned, treating as failure");
            breaker.record_failure(key);
        }
    }
}

/// Wraps operations with bounded retries, circuit breaking and a fallback.
///
/// Cheap to share behind an `Arc`; all state is atomic or lives in the
/// breaker registry.
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
    metrics: Arc<dyn MetricsSink>,
    counters: Counters,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl RetryExecutor {
    /// Creates an executor without a circuit breaker.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            breaker: None,
            metrics: Arc::new(NoopMetrics),
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Consults `breaker` before every attempt.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Cancelling `shutdown` interrupts any backoff sleep.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Runs `op` with the configured retry budget, then `fallback` if needed.
    pub async fn execute<T, F, Fut, G, GFut>(
        &self,
        op: F,
        fallback: G,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = DomainResult<T>>,
    {
        self.execute_with_retry(op, fallback, self.policy.max_retries)
            .await
    }

    /// Runs `op` up to `max_retries + 1` times, then `fallback`.
    ///
    /// Non-retryable errors skip straight to the fallback, so `op` runs once.
    /// If a breaker for any upstream error class is open the call is not
    /// attempted at all. When both sides fail the result preserves both
    /// errors.
    pub async fn execute_with_retry<T, F, Fut, G, GFut>(
        &self,
        mut op: F,
        fallback: G,
        max_retries: u32,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = DomainResult<T>>,
    {
        let mut retries_done: u32 = 0;

        let primary = loop {
            let mut probes = match self.admit() {
                Ok(probes) => probes,
                Err(rejected_key) => {
                    debug!(key = %rejected_key, "circuit open, bypassing to fallback");
                    break DomainError::CircuitOpen { key: rejected_key };
                }
            };

            match op().await {
                Ok(value) => {
                    probes.settle(None);
                    if retries_done > 0 {
                        Counters::bump(&self.counters.successful_retries);
                        let retries = retries_done.to_string();
                        self.metrics.record(
                            names::RETRY_SUCCEEDED_TOTAL,
                            1.0,
                            &[("retries", retries.as_str())],
                        );
                        info!(retries = retries_done, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let kind = error.kind();
                    Counters::bump(&self.counters.total_errors);
                    self.record_breaker_failure(kind);
                    probes.settle(Some(kind));

                    if !should_retry(&error, retries_done, max_retries) {
                        if retries_done >= max_retries && retries_done > 0 {
                            Counters::bump(&self.counters.failed_retries);
                            self.metrics.record(
                                names::RETRY_EXHAUSTED_TOTAL,
                                1.0,
                                &[("kind", kind.as_str())],
                            );
                            warn!(
                                kind = %kind,
                                retries = retries_done,
                                error = %error,
                                "retries exhausted"
                            );
                        } else {
                            Counters::bump(&self.counters.non_retryable_errors);
                            debug!(kind = %kind, error = %error, "non-retryable error");
                        }
                        break error;
                    }

                    Counters::bump(&self.counters.retryable_errors);
                    retries_done += 1;
                    let delay = self.policy.delay_for(retries_done);
                    self.metrics.record(
                        names::RETRY_ATTEMPTS_TOTAL,
                        1.0,
                        &[("kind", kind.as_str())],
                    );
                    debug!(
                        kind = %kind,
                        retry = retries_done,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after backoff"
                    );

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            info!(retry = retries_done, "shutdown during backoff");
                            return Err(ResilienceError::Cancelled { last: error });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        self.run_fallback(primary, fallback).await
    }

    /// Single-shot variant: runs `op` once and falls back on any error.
    pub async fn execute_with_fallback<T, F, Fut, G, GFut>(
        &self,
        op: F,
        fallback: G,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = DomainResult<T>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(primary) => {
                Counters::bump(&self.counters.total_errors);
                self.run_fallback(primary, fallback).await
            }
        }
    }

    async fn run_fallback<T, G, GFut>(
        &self,
        primary: DomainError,
        fallback: G,
    ) -> Result<T, ResilienceError>
    where
        G: FnOnce() -> GFut,
        GFut: Future<Output = DomainResult<T>>,
    {
        Counters::bump(&self.counters.fallback_executions);
        let kind = primary.kind();
        self.metrics.record(
            names::FALLBACK_EXECUTIONS_TOTAL,
            1.0,
            &[("kind", kind.as_str())],
        );
        debug!(kind = %kind, error = %primary, "executing fallback");

        match fallback().await {
            Ok(value) => Ok(value),
            Err(fallback_error) => {
                self.metrics.record(
                    names::FALLBACK_FAILURES_TOTAL,
                    1.0,
                    &[("kind", kind.as_str())],
                );
                warn!(
                    primary = %primary,
                    fallback = %fallback_error,
                    "operation and fallback both failed"
                );
                Err(ResilienceError::FallbackFailed {
                    primary,
                    fallback: fallback_error,
                })
            }
        }
    }

    /// Asks every upstream breaker for admission.
    ///
    /// Returns the probe keys granted, or the first rejecting key. Probes
    /// granted before a rejection are handed back.
    fn admit(&self) -> Result<ProbeSet<'_>, String> {
        let Some(breaker) = &self.breaker else {
            return Ok(ProbeSet::empty());
        };
        let mut probes = ProbeSet {
            breaker: Some(breaker.as_ref()),
            keys: Vec::new(),
        };
        for kind in ErrorKind::BREAKER_KINDS {
            match breaker.try_acquire(kind.as_str()) {
                Admission::Allowed => {}
                Admission::Probe => probes.keys.push(kind.as_str()),
                Admission::Rejected => {
                    probes.release();
                    return Err(kind.as_str().to_string());
                }
            }
        }
        Ok(probes)
    }

    fn record_breaker_failure(&self, kind: ErrorKind) {
        if let Some(breaker) = &self.breaker {
            if ErrorKind::BREAKER_KINDS.contains(&kind) {
                breaker.record_failure(kind.as_str());
            }
        }
    }

    pub fn statistics(&self) -> ExecutorStatistics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let successful = load(&self.counters.successful_retries);
        let failed = load(&self.counters.failed_retries);
        let attempts = successful + failed;
        ExecutorStatistics {
            total_errors: load(&self.counters.total_errors),
            retryable_errors: load(&self.counters.retryable_errors),
            non_retryable_errors: load(&self.counters.non_retryable_errors),
            successful_retries: successful,
            failed_retries: failed,
            fallback_executions: load(&self.counters.fallback_executions),
            retry_success_rate: if attempts == 0 {
                0.0
            } else {
                successful as f64 / attempts as f64
            },
        }
    }

    /// Zeroes every counter.
    pub fn reset_statistics(&self) {
        for counter in [
            &self.counters.total_errors,
            &self.counters.retryable_errors,
            &self.counters.non_retryable_errors,
            &self.counters.successful_retries,
            &self.counters.failed_retries,
            &self.counters.fallback_executions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitBreakerConfig;
    use crate::telemetry::InMemoryMetrics;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
    }

    fn network_error() -> DomainError {
        DomainError::Network {
            message: "connection refused".into(),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_runs_op_and_fallback_once() {
        // Arrange
        let executor = RetryExecutor::new(fast_policy(3));
        let op_calls = AtomicU32::new(0);
        let fallback_calls = AtomicU32::new(0);

        // Act
        let result = executor
            .execute(
                || {
                    op_calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<u32, _>(DomainError::validation("malformed")) }
                },
                || {
                    fallback_calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(7) }
                },
            )
            .await;

        // Assert
        assert_eq!(result, Ok(7));
        assert_eq!(op_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
        let stats = executor.statistics();
        assert_eq!(stats.non_retryable_errors, 1);
        assert_eq!(stats.fallback_executions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried_until_success() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let executor = RetryExecutor::new(fast_policy(3)).with_metrics(metrics.clone());
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(network_error())
                        } else {
                            Ok("done")
                        }
                    }
                },
                || async { Ok("fallback") },
            )
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = executor.statistics();
        assert_eq!(stats.retryable_errors, 2);
        assert_eq!(stats.successful_retries, 1);
        assert_eq!(stats.fallback_executions, 0);
        assert_eq!(stats.retry_success_rate, 1.0);
        assert_eq!(metrics.total(names::RETRY_SUCCEEDED_TOTAL), 1.0);
        assert_eq!(metrics.total(names::RETRY_ATTEMPTS_TOTAL), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fall_back() {
        let executor = RetryExecutor::new(fast_policy(2));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<u32, _>(network_error()) }
                },
                || async { Ok(0) },
            )
            .await;

        assert_eq!(result, Ok(0));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = executor.statistics();
        assert_eq!(stats.failed_retries, 1);
        assert_eq!(stats.total_errors, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_follow_policy() {
        let executor = RetryExecutor::new(
            RetryPolicy::default()
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(1000))
                .with_max_delay(Duration::from_millis(30_000)),
        );
        let started = tokio::time::Instant::now();

        let _ = executor
            .execute(
                || async { Err::<(), _>(network_error()) },
                || async { Ok(()) },
            )
            .await;

        // 2s before the first retry, 4s before the second.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(6000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(6100), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_fallback_failure_preserves_both_errors() {
        let executor = RetryExecutor::new(fast_policy(0));

        let result = executor
            .execute(
                || async { Err::<(), _>(DomainError::validation("bad input")) },
                || async { Err(DomainError::other("cache empty")) },
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.primary(), &DomainError::validation("bad input"));
        match err {
            ResilienceError::FallbackFailed { fallback, .. } => {
                assert_eq!(fallback, DomainError::other("cache empty"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_bypasses_op() {
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::default().with_error_threshold(2),
        ));
        let executor = RetryExecutor::new(fast_policy(0)).with_circuit_breaker(breaker.clone());
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _ = executor
                .execute(
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(network_error()) }
                    },
                    || async { Ok(()) },
                )
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let result = executor
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, DomainError>(1) }
                },
                || async { Ok(99) },
            )
            .await;

        assert_eq!(result, Ok(99));
        assert_eq!(calls.load(Ordering::SeqCst), 2, "op must not run while open");
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_success_closes_circuit() {
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_error_threshold(1)
                .with_open_timeout(Duration::from_secs(60)),
        ));
        let executor = RetryExecutor::new(fast_policy(0)).with_circuit_breaker(breaker.clone());

        let _ = executor
            .execute(|| async { Err::<(), _>(network_error()) }, || async { Ok(()) })
            .await;
        assert!(breaker.should_trigger("NETWORK"));

        tokio::time::advance(Duration::from_secs(61)).await;
        let result = executor
            .execute(|| async { Ok::<_, DomainError>("live") }, || async { Ok("cached") })
            .await;

        assert_eq!(result, Ok("live"));
        assert!(!breaker.should_trigger("NETWORK"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let shutdown = CancellationToken::new();
        let executor = RetryExecutor::new(
            RetryPolicy::default()
                .with_max_retries(5)
                .with_base_delay(Duration::from_secs(10)),
        )
        .with_shutdown(shutdown.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.cancel();
        });

        let result = executor
            .execute(|| async { Err::<(), _>(network_error()) }, || async { Ok(()) })
            .await;
        canceller.await.unwrap();

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.primary(), &network_error());
    }

    #[tokio::test]
    async fn test_execute_with_fallback_is_single_shot() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute_with_fallback(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<u8, _>(network_error()) }
                },
                || async { Ok(1) },
            )
            .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_statistics() {
        let executor = RetryExecutor::new(fast_policy(0));
        let _ = executor
            .execute(
                || async { Err::<(), _>(DomainError::validation("x")) },
                || async { Ok(()) },
            )
            .await;
        assert_eq!(executor.statistics().total_errors, 1);

        executor.reset_statistics();
        let stats = executor.statistics();
        assert_eq!(stats.total_errors, 0);
        assert_eq!(stats.fallback_executions, 0);
    }
}
