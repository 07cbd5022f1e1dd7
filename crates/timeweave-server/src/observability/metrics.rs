//! Prometheus metrics infrastructure.
//!
//! Metrics are recorded through the `metrics` crate (see
//! [`timeweave_domain::MetricsCrateSink`]) and exposed with
//! `metrics-exporter-prometheus`.

use std::sync::Arc;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use timeweave_domain::telemetry::names as domain;

/// Metric names emitted by the server crate.
pub mod names {
    pub const BATCH_DURATION_SECONDS: &str = "timeweave_batch_duration_seconds";
    pub const BATCH_UNITS_TOTAL: &str = "timeweave_batch_units_total";
    pub const ACTIVE_UNITS_CURRENT: &str = "timeweave_active_units_current";
    pub const DUPLICATES_DETECTED_TOTAL: &str = "timeweave_duplicates_detected_total";
    pub const CACHE_ENTRIES_PURGED_TOTAL: &str = "timeweave_cache_entries_purged_total";
}

/// Shared handle for rendering the Prometheus exposition.
#[derive(Clone)]
pub struct MetricsState {
    handle: Arc<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Renders the current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Error type for metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: recorder already installed")]
    AlreadyInstalled,
}

/// Installs the global Prometheus recorder and describes every metric.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics() -> Result<MetricsState, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|_| MetricsError::AlreadyInstalled)?;

    register_default_metrics();

    Ok(MetricsState::new(handle))
}

fn register_default_metrics() {
    // Retry executor and circuit breakers
    metrics::describe_counter!(
        domain::RETRY_ATTEMPTS_TOTAL,
        "Retries scheduled after a retryable failure, by error kind"
    );
    metrics::describe_counter!(
        domain::RETRY_SUCCEEDED_TOTAL,
        "Operations that succeeded after at least one retry"
    );
    metrics::describe_counter!(
        domain::RETRY_EXHAUSTED_TOTAL,
        "Operations that used up their retry budget"
    );
    metrics::describe_counter!(
        domain::FALLBACK_EXECUTIONS_TOTAL,
        "Fallback invocations, by triggering error kind"
    );
    metrics::describe_counter!(domain::FALLBACK_FAILURES_TOTAL, "Fallbacks that failed too");
    metrics::describe_counter!(
        domain::CIRCUIT_OPENED_TOTAL,
        "Circuit breaker transitions to OPEN, by key"
    );
    metrics::describe_counter!(
        domain::CIRCUIT_REJECTIONS_TOTAL,
        "Calls bypassed because a circuit was open"
    );

    // Segment calls and payload cache
    metrics::describe_counter!(domain::SEGMENT_CALLS_TOTAL, "Segment calls, by outcome");
    metrics::describe_histogram!(
        domain::SEGMENT_CALL_DURATION_SECONDS,
        "Segment call duration in seconds, by outcome"
    );
    metrics::describe_counter!(domain::FALLBACK_CACHE_HITS_TOTAL, "Segment cache hits");
    metrics::describe_counter!(domain::FALLBACK_CACHE_MISSES_TOTAL, "Segment cache misses");

    // Batches
    metrics::describe_histogram!(
        names::BATCH_DURATION_SECONDS,
        "Batch wall time in seconds"
    );
    metrics::describe_counter!(names::BATCH_UNITS_TOTAL, "Executed units, by outcome");
    metrics::describe_gauge!(names::ACTIVE_UNITS_CURRENT, "Units currently executing");

    // Duplicate suppression
    metrics::describe_counter!(
        names::DUPLICATES_DETECTED_TOTAL,
        "Requests suppressed as duplicates, by matching rule"
    );
    metrics::describe_counter!(
        names::CACHE_ENTRIES_PURGED_TOTAL,
        "Expired creation cache entries removed"
    );
}
