//! Metric emission seam.
//!
//! The orchestration core reports through [`MetricsSink`] and never owns
//! storage or dashboards. [`MetricsCrateSink`] forwards to the global
//! `metrics` recorder, following Prometheus naming conventions:
//!
//! - `*_total` names are counters, incremented by `value`
//! - `*_current` names are gauges, set to `value`
//! - everything else is a histogram observation

use std::sync::Mutex;

use metrics::Label;

/// Metric names emitted by the domain layer.
pub mod names {
    pub const RETRY_ATTEMPTS_TOTAL: &str = "timeweave_retry_attempts_total";
    pub const RETRY_SUCCEEDED_TOTAL: &str = "timeweave_retry_succeeded_total";
    pub const RETRY_EXHAUSTED_TOTAL: &str = "timeweave_retry_exhausted_total";
    pub const FALLBACK_EXECUTIONS_TOTAL: &str = "timeweave_fallback_executions_total";
    pub const FALLBACK_FAILURES_TOTAL: &str = "timeweave_fallback_failures_total";
    pub const CIRCUIT_OPENED_TOTAL: &str = "timeweave_circuit_opened_total";
    pub const CIRCUIT_REJECTIONS_TOTAL: &str = "timeweave_circuit_rejections_total";
    pub const SEGMENT_CALLS_TOTAL: &str = "timeweave_segment_calls_total";
    pub const SEGMENT_CALL_DURATION_SECONDS: &str = "timeweave_segment_call_duration_seconds";
    pub const FALLBACK_CACHE_HITS_TOTAL: &str = "timeweave_fallback_cache_hits_total";
    pub const FALLBACK_CACHE_MISSES_TOTAL: &str = "timeweave_fallback_cache_misses_total";
}

/// Receiver of performance and error telemetry.
pub trait MetricsSink: Send + Sync {
    /// Records one observation of `name` with the given tags.
    fn record(&self, name: &str, value: f64, tags: &[(&str, &str)]);
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
}

/// Forwards observations to the process-wide `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCrateSink;

impl MetricsSink for MetricsCrateSink {
    fn record(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        let labels: Vec<Label> = tags
            .iter()
            .map(|(k, v)| Label::new(k.to_string(), v.to_string()))
            .collect();

        if name.ends_with("_total") {
            metrics::counter!(name.to_string(), labels).increment(value.max(0.0) as u64);
        } else if name.ends_with("_current") {
            metrics::gauge!(name.to_string(), labels).set(value);
        } else {
            metrics::histogram!(name.to_string(), labels).record(value);
        }
    }
}

/// A single captured observation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMetric {
    pub name: String,
    pub value: f64,
    pub tags: Vec<(String, String)>,
}

/// Captures observations in memory; intended for tests and diagnostics.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    records: Mutex<Vec<RecordedMetric>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every observation recorded so far.
    pub fn records(&self) -> Vec<RecordedMetric> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Sum of values recorded under `name`.
    pub fn total(&self, name: &str) -> f64 {
        self.records()
            .iter()
            .filter(|r| r.name == name)
            .map(|r| r.value)
            .sum()
    }

    /// Number of observations recorded under `name`.
    pub fn count(&self, name: &str) -> usize {
        self.records().iter().filter(|r| r.name == name).count()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        if let Ok(mut records) = self.records.lock() {
            records.push(RecordedMetric {
                name: name.to_string(),
                value,
                tags: tags
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
    }
}
