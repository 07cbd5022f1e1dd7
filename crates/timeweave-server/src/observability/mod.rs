//! Observability infrastructure for timeweave.
//!
//! This module provides:
//! - Structured logging configuration
//! - Prometheus metrics recorder setup
//! - Names of the metrics emitted by the server crate

mod logging;
mod metrics;

pub use self::logging::{init_logging, LoggingConfig};
pub use self::metrics::{init_metrics, names, MetricsError, MetricsState};
