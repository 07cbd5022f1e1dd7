//! Per error-class circuit breaker.
//!
//! # State Transitions
//!
//! ```text
//! CLOSED    -> OPEN      error count >= threshold within the window (on next check)
//! OPEN      -> HALF_OPEN open timeout elapsed (first check after it admits one probe)
//! HALF_OPEN -> CLOSED    probe succeeded, counter reset
//! HALF_OPEN -> OPEN      probe failed, open timeout restarted
//! ```
//!
//! States live in a `DashMap`, so checks for different keys contend only on
//! their shard lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::telemetry::{names, MetricsSink, NoopMetrics};

/// Configuration shared by every breaker in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Errors within `window` that open the circuit.
    pub error_threshold: u32,
    /// Rolling observation window for the error count.
    pub window: Duration,
    /// How long an open circuit rejects calls before admitting a probe.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            window: Duration::from_secs(60),
            open_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }
}

/// Observable breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Result of asking a breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; call normally.
    Allowed,
    /// Circuit half-open and this caller holds the single probe.
    Probe,
    /// Circuit open (or probe outstanding); bypass the call.
    Rejected,
}

#[derive(Debug)]
struct CircuitState {
    phase: CircuitPhase,
    error_count: u32,
    window_started: Option<Instant>,
    opened_at: Option<Instant>,
    last_error_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            error_count: 0,
            window_started: None,
            opened_at: None,
            last_error_at: None,
            probe_in_flight: false,
        }
    }
}

impl CircuitState {
    fn prune_window(&mut self, now: Instant, window: Duration) {
        if let Some(started) = self.window_started {
            if now.duration_since(started) > window {
                self.error_count = 0;
                self.window_started = None;
            }
        }
    }

    fn open(&mut self, now: Instant) {
        self.phase = CircuitPhase::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        self.phase = CircuitPhase::Closed;
        self.error_count = 0;
        self.window_started = None;
        self.opened_at = None;
        self.probe_in_flight = false;
    }
}

/// Point-in-time view of one breaker, for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatus {
    pub key: String,
    pub phase: CircuitPhase,
    pub error_count: u32,
    pub error_threshold: u32,
    pub open_timeout_secs: u64,
    /// Time until an open circuit admits a probe.
    pub remaining_open_secs: Option<u64>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Registry of circuit breakers keyed by error class.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    states: DashMap<String, CircuitState>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("keys", &self.states.len())
            .finish()
    }
}

impl CircuitBreaker {
    /// Creates an empty registry.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Sets the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns true if calls classified under `key` should be bypassed.
    ///
    /// This check drives the CLOSED -> OPEN and OPEN -> HALF_OPEN transitions.
    /// The first check after the open timeout returns `false` and hands the
    /// caller the single half-open probe.
    pub fn should_trigger(&self, key: &str) -> bool {
        self.try_acquire(key) == Admission::Rejected
    }

    /// Asks for permission to call under `key`.
    pub fn try_acquire(&self, key: &str) -> Admission {
        if key.trim().is_empty() {
            return Admission::Allowed;
        }
        let Some(mut state) = self.states.get_mut(key) else {
            return Admission::Allowed;
        };
        let now = Instant::now();

        match state.phase {
            CircuitPhase::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                if now.duration_since(opened_at) < self.config.open_timeout {
                    self.metrics
                        .record(names::CIRCUIT_REJECTIONS_TOTAL, 1.0, &[("key", key)]);
                    Admission::Rejected
                } else {
                    state.phase = CircuitPhase::HalfOpen;
                    state.probe_in_flight = true;
                    info!(key, "circuit breaker half-open, admitting probe");
                    Admission::Probe
                }
            }
            CircuitPhase::HalfOpen => {
                if state.probe_in_flight {
                    self.metrics
                        .record(names::CIRCUIT_REJECTIONS_TOTAL, 1.0, &[("key", key)]);
                    Admission::Rejected
                } else {
                    state.probe_in_flight = true;
                    Admission::Probe
                }
            }
            CircuitPhase::Closed => {
                state.prune_window(now, self.config.window);
                if state.error_count >= self.config.error_threshold {
                    state.open(now);
                    warn!(
                        key,
                        error_count = state.error_count,
                        threshold = self.config.error_threshold,
                        "circuit breaker opened"
                    );
                    self.metrics
                        .record(names::CIRCUIT_OPENED_TOTAL, 1.0, &[("key", key)]);
                    Admission::Rejected
                } else {
                    Admission::Allowed
                }
            }
        }
    }

    /// Records a failed call classified under `key`.
    pub fn record_failure(&self, key: &str) {
        if key.trim().is_empty() {
            return;
        }
        let now = Instant::now();
        let mut state = self.states.entry(key.to_string()).or_default();
        state.last_error_at = Some(Utc::now());

        match state.phase {
            CircuitPhase::HalfOpen => {
                state.open(now);
                warn!(key, "half-open probe failed, circuit re-opened");
            }
            CircuitPhase::Open => {}
            CircuitPhase::Closed => {
                state.prune_window(now, self.config.window);
                if state.window_started.is_none() {
                    state.window_started = Some(now);
                }
                state.error_count = state.error_count.saturating_add(1);
            }
        }
    }

    /// Records a successful call made under `key`.
    ///
    /// Only a half-open probe changes state: it closes the circuit.
    pub fn record_success(&self, key: &str) {
        if let Some(mut state) = self.states.get_mut(key) {
            if state.phase == CircuitPhase::HalfOpen {
                state.close();
                info!(key, "half-open probe succeeded, circuit closed");
            }
        }
    }

    /// Gives back a probe that was acquired but never used.
    pub fn release_probe(&self, key: &str) {
        if let Some(mut state) = self.states.get_mut(key) {
            if state.phase == CircuitPhase::HalfOpen {
                state.probe_in_flight = false;
            }
        }
    }

    /// Operator action: force the breaker for `key` back to CLOSED.
    pub fn reset(&self, key: &str) {
        if key.trim().is_empty() {
            return;
        }
        self.states.entry(key.to_string()).or_default().close();
        info!(key, "circuit breaker reset");
    }

    /// Returns the status of the breaker for `key` (CLOSED if never seen).
    pub fn status(&self, key: &str) -> CircuitStatus {
        let now = Instant::now();
        let (phase, error_count, remaining, last_error_at) = match self.states.get(key) {
            Some(state) => {
                let remaining = match (state.phase, state.opened_at) {
                    (CircuitPhase::Open, Some(opened_at)) => Some(
                        self.config
                            .open_timeout
                            .saturating_sub(now.duration_since(opened_at))
                            .as_secs(),
                    ),
                    _ => None,
                };
                (state.phase, state.error_count, remaining, state.last_error_at)
            }
            None => (CircuitPhase::Closed, 0, None, None),
        };

        CircuitStatus {
            key: key.to_string(),
            phase,
            error_count,
            error_threshold: self.config.error_threshold,
            open_timeout_secs: self.config.open_timeout.as_secs(),
            remaining_open_secs: remaining,
            last_error_at,
        }
    }

    /// Status of every breaker seen so far, ordered by key.
    pub fn snapshot(&self) -> Vec<CircuitStatus> {
        let mut keys: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys.iter().map(|k| self.status(k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_error_threshold(threshold)
                .with_window(Duration::from_secs(60))
                .with_open_timeout(Duration::from_secs(300)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_failures() {
        let cb = breaker(3);
        for _ in 0..2 {
            cb.record_failure("NETWORK");
        }
        assert!(!cb.should_trigger("NETWORK"));

        cb.record_failure("NETWORK");
        assert!(cb.should_trigger("NETWORK"));
        assert_eq!(cb.status("NETWORK").phase, CircuitPhase::Open);
        // Other keys are unaffected.
        assert!(!cb.should_trigger("TIMEOUT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_exactly_one_probe() {
        let cb = breaker(1);
        cb.record_failure("API");
        assert!(cb.should_trigger("API"));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cb.should_trigger("API"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cb.should_trigger("API"), "first check after timeout is the probe");
        assert_eq!(cb.status("API").phase, CircuitPhase::HalfOpen);
        assert!(cb.should_trigger("API"), "probe outstanding");
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_probe_closes_and_resets_counter() {
        let cb = breaker(2);
        cb.record_failure("API");
        cb.record_failure("API");
        assert!(cb.should_trigger("API"));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cb.try_acquire("API"), Admission::Probe);
        cb.record_success("API");

        let status = cb.status("API");
        assert_eq!(status.phase, CircuitPhase::Closed);
        assert_eq!(status.error_count, 0);
        assert!(!cb.should_trigger("API"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_and_restarts_timeout() {
        let cb = breaker(1);
        cb.record_failure("RATE_LIMIT");
        assert!(cb.should_trigger("RATE_LIMIT"));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cb.try_acquire("RATE_LIMIT"), Admission::Probe);
        cb.record_failure("RATE_LIMIT");

        assert_eq!(cb.status("RATE_LIMIT").phase, CircuitPhase::Open);
        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(cb.should_trigger("RATE_LIMIT"), "timeout restarted on probe failure");
        assert_eq!(cb.status("RATE_LIMIT").remaining_open_secs, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_outside_window_do_not_accumulate() {
        let cb = breaker(3);
        cb.record_failure("TIMEOUT");
        cb.record_failure("TIMEOUT");
        tokio::time::advance(Duration::from_secs(61)).await;
        cb.record_failure("TIMEOUT");
        assert!(!cb.should_trigger("TIMEOUT"));
        assert_eq!(cb.status("TIMEOUT").error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_probe_can_be_reacquired() {
        let cb = breaker(1);
        cb.record_failure("NETWORK");
        assert!(cb.should_trigger("NETWORK"));
        tokio::time::advance(Duration::from_secs(301)).await;

        assert_eq!(cb.try_acquire("NETWORK"), Admission::Probe);
        cb.release_probe("NETWORK");
        assert_eq!(cb.try_acquire("NETWORK"), Admission::Probe);
    }

    #[test]
    fn test_reset_and_blank_keys() {
        let cb = breaker(1);
        cb.record_failure("SERVER_ERROR");
        assert!(cb.should_trigger("SERVER_ERROR"));

        cb.reset("SERVER_ERROR");
        assert!(!cb.should_trigger("SERVER_ERROR"));

        cb.record_failure("  ");
        assert!(!cb.should_trigger("  "));
        assert_eq!(cb.snapshot().len(), 1);
    }
}
