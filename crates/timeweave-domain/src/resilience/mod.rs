//! Failure handling around unreliable upstream calls.
//!
//! - [`backoff`]: retry classification and exponential delays
//! - [`circuit`]: per error-class circuit breakers
//! - [`executor`]: the retry/fallback executor tying both together

mod backoff;
mod circuit;
mod executor;

pub use backoff::{should_retry, RetryPolicy, UNKNOWN_RETRY_LIMIT};
pub use circuit::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitPhase, CircuitStatus};
pub use executor::{ExecutorStatistics, RetryExecutor};
