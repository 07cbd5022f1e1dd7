//! Configuration management for timeweave.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use timeweave_server::config::TimeweaveConfig;
//!
//! // Load from file with env overrides
//! let config = TimeweaveConfig::load("timeweave.yaml")?;
//!
//! // Or load from environment only
//! let config = TimeweaveConfig::from_env()?;
//! let coordinator = config.coordinator_config();
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use timeweave_domain::resilience::{CircuitBreakerConfig, RetryPolicy};
use timeweave_domain::segmentation::SegmentationConfig;
use timeweave_domain::SegmentCacheConfig;

use crate::handlers::batch::{CoordinatorConfig, DEFAULT_QUEUE_FACTOR};
use crate::handlers::dedup::DuplicationConfig;
use crate::observability::LoggingConfig;

/// Environment variable prefix, e.g. `TIMEWEAVE_COORDINATOR__CONCURRENCY`.
const ENV_PREFIX: &str = "TIMEWEAVE";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TimeweaveConfig {
    #[serde(default)]
    pub coordinator: CoordinatorSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub duplication: DuplicationSettings,

    #[serde(default)]
    pub segmentation: SegmentationSettings,

    #[serde(default)]
    pub fallback_cache: FallbackCacheSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Batch coordinator settings.
///
/// - `TIMEWEAVE_COORDINATOR__CONCURRENCY=8` - Units executing at once
/// - `TIMEWEAVE_COORDINATOR__CALL_TIMEOUT_MS=45000` - Hard per-unit deadline
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CoordinatorSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Queued units per worker before the submitter runs units itself
    #[serde(default = "default_queue_factor")]
    pub queue_factor: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            call_timeout_ms: default_call_timeout_ms(),
            queue_factor: default_queue_factor(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_queue_factor() -> usize {
    DEFAULT_QUEUE_FACTOR
}

/// Retry and backoff settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CircuitBreakerSettings {
    /// Failures within the window that open a circuit
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How long an open circuit rejects calls before probing
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            window_secs: default_window_secs(),
            open_timeout_secs: default_open_timeout_secs(),
        }
    }
}

fn default_error_threshold() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_open_timeout_secs() -> u64 {
    300
}

/// Duplicate-request suppression settings.
///
/// # Example YAML Configuration
///
/// ```yaml
/// duplication:
///   cache_ttl_minutes: 30
///   recent_window_minutes: 5
///   strict_mode: true
///   similarity_threshold: 0.85
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DuplicationSettings {
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u64,

    #[serde(default = "default_recent_window_minutes")]
    pub recent_window_minutes: u64,

    /// Enables fuzzy name matching
    #[serde(default)]
    pub strict_mode: bool,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_similarity_window_days")]
    pub similarity_window_days: u64,

    #[serde(default = "default_similarity_candidates")]
    pub similarity_candidates: usize,

    /// Interval of the expired-entry purge
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for DuplicationSettings {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: default_cache_ttl_minutes(),
            recent_window_minutes: default_recent_window_minutes(),
            strict_mode: false,
            similarity_threshold: default_similarity_threshold(),
            similarity_window_days: default_similarity_window_days(),
            similarity_candidates: default_similarity_candidates(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_cache_ttl_minutes() -> u64 {
    30
}

fn default_recent_window_minutes() -> u64 {
    5
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_similarity_window_days() -> u64 {
    1
}

fn default_similarity_candidates() -> usize {
    100
}

fn default_cleanup_interval_secs() -> u64 {
    600
}

/// Time-range segmentation settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SegmentationSettings {
    #[serde(default = "default_max_span_days")]
    pub max_span_days: u32,

    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            max_span_days: default_max_span_days(),
            max_segments: default_max_segments(),
        }
    }
}

fn default_max_span_days() -> u32 {
    7
}

fn default_max_segments() -> usize {
    10
}

/// Segment payload cache used as a degraded fallback.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FallbackCacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    #[serde(default = "default_cache_entry_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for FallbackCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: default_max_capacity(),
            ttl_secs: default_cache_entry_ttl_secs(),
        }
    }
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_cache_entry_ttl_secs() -> u64 {
    3_600
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricsSettings {
    /// Install the Prometheus recorder
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

fn invalid(message: impl Into<String>) -> ConfigLoadError {
    ConfigLoadError::Invalid {
        message: message.into(),
    }
}

impl TimeweaveConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `TIMEWEAVE_` and use `__` as
    /// separator. For example:
    /// - `TIMEWEAVE_COORDINATOR__CONCURRENCY=8` overrides `coordinator.concurrency`
    /// - `TIMEWEAVE_DUPLICATION__STRICT_MODE=true` overrides `duplication.strict_mode`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&TimeweaveConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(env_source())
            .build()?;

        let loaded: TimeweaveConfig = config.try_deserialize()?;
        loaded.validate()?;

        Ok(loaded)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&TimeweaveConfig::default())?)
            .add_source(env_source())
            .build()?;

        let loaded: TimeweaveConfig = config.try_deserialize()?;
        loaded.validate()?;

        Ok(loaded)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.coordinator.concurrency == 0 {
            return Err(invalid("coordinator.concurrency must be greater than 0"));
        }
        if self.coordinator.call_timeout_ms == 0 {
            return Err(invalid("coordinator.call_timeout_ms must be greater than 0"));
        }

        if self.retry.base_delay_ms == 0 {
            return Err(invalid("retry.base_delay_ms must be greater than 0"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid(format!(
                "retry.max_delay_ms ({}) must not be below retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }

        if self.circuit_breaker.error_threshold == 0 {
            return Err(invalid(
                "circuit_breaker.error_threshold must be greater than 0",
            ));
        }
        if self.circuit_breaker.window_secs == 0 || self.circuit_breaker.open_timeout_secs == 0 {
            return Err(invalid(
                "circuit_breaker.window_secs and open_timeout_secs must be greater than 0",
            ));
        }

        let dup = &self.duplication;
        if dup.cache_ttl_minutes == 0 {
            return Err(invalid("duplication.cache_ttl_minutes must be greater than 0"));
        }
        if !(dup.similarity_threshold > 0.0 && dup.similarity_threshold <= 1.0) {
            return Err(invalid(format!(
                "duplication.similarity_threshold must be in (0, 1], got: {}",
                dup.similarity_threshold
            )));
        }
        if dup.similarity_candidates == 0 {
            return Err(invalid(
                "duplication.similarity_candidates must be greater than 0",
            ));
        }
        if dup.cleanup_interval_secs == 0 {
            return Err(invalid(
                "duplication.cleanup_interval_secs must be greater than 0",
            ));
        }

        if self.segmentation.max_span_days == 0 || self.segmentation.max_segments == 0 {
            return Err(invalid(
                "segmentation.max_span_days and max_segments must be greater than 0",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "logging.level must be one of: {:?}, got: {}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_concurrency(self.coordinator.concurrency)
            .with_call_timeout(Duration::from_millis(self.coordinator.call_timeout_ms))
            .with_queue_factor(self.coordinator.queue_factor)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.retry.max_retries)
            .with_base_delay(Duration::from_millis(self.retry.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_error_threshold(self.circuit_breaker.error_threshold)
            .with_window(Duration::from_secs(self.circuit_breaker.window_secs))
            .with_open_timeout(Duration::from_secs(self.circuit_breaker.open_timeout_secs))
    }

    pub fn duplication_config(&self) -> DuplicationConfig {
        let dup = &self.duplication;
        DuplicationConfig {
            cache_ttl: Duration::from_secs(dup.cache_ttl_minutes * 60),
            recent_window: Duration::from_secs(dup.recent_window_minutes * 60),
            strict_mode: dup.strict_mode,
            similarity_threshold: dup.similarity_threshold,
            similarity_tolerance: Duration::from_secs(dup.similarity_window_days * 24 * 60 * 60),
            similarity_candidates: dup.similarity_candidates,
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.duplication.cleanup_interval_secs)
    }

    pub fn segmentation_config(&self) -> SegmentationConfig {
        SegmentationConfig::default()
            .with_max_span_days(self.segmentation.max_span_days)
            .with_max_segments(self.segmentation.max_segments)
    }

    /// The segment cache configuration, or `None` when the cache is disabled.
    pub fn fallback_cache_config(&self) -> Option<SegmentCacheConfig> {
        self.fallback_cache.enabled.then(|| {
            SegmentCacheConfig::default()
                .with_max_capacity(self.fallback_cache.max_capacity)
                .with_ttl(Duration::from_secs(self.fallback_cache.ttl_secs))
        })
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_level_name(&self.logging.level, self.logging.json)
            .unwrap_or_else(|| LoggingConfig {
                json_format: self.logging.json,
                ..LoggingConfig::default()
            })
    }
}

// Use __ as separator for nested keys: TIMEWEAVE_RETRY__MAX_RETRIES -> retry.max_retries
fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
