//! Structured logging setup driven by the `logging` configuration section.
//!
//! `RUST_LOG` overrides the configured level.

use std::str::FromStr;

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format and default level of the process-wide subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// One JSON object per line instead of human-readable text.
    pub json_format: bool,
    /// Level used when `RUST_LOG` is unset.
    pub default_level: Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
        }
    }
}

impl LoggingConfig {
    /// Builds a configuration from a level name such as "debug".
    ///
    /// Returns `None` for an unknown level.
    pub fn from_level_name(level: &str, json_format: bool) -> Option<Self> {
        let default_level = Level::from_str(level).ok()?;
        Some(Self {
            json_format,
            default_level,
        })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_level.to_string()))
    }
}

/// Initializes the global subscriber, writing to stdout.
///
/// Call once at startup; later calls have no effect.
pub fn init_logging(config: &LoggingConfig) {
    let subscriber = build_subscriber(config, config.filter(), std::io::stdout);
    // A subscriber installed earlier wins.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn build_subscriber<W>(
    config: &LoggingConfig,
    filter: EnvFilter,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_format {
        Box::new(
            registry.with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_target(true),
            ),
        )
    } else {
        Box::new(
            registry.with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            ),
        )
    }
}
