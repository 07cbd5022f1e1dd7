//! Domain error types and the error-class taxonomy used by the resilience layer.

use std::fmt;

use thiserror::Error;

/// Error class used for retry decisions and circuit-breaker keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed input or request; never retried.
    Validation,
    /// Connection, socket or DNS level failure.
    Network,
    /// The upstream call did not answer in time.
    Timeout,
    /// Upstream rejected the call because of quota or throttling.
    RateLimit,
    /// Upstream answered with a 5xx-style failure.
    ServerError,
    /// Upstream API returned an unusable answer.
    Api,
    /// The call was bypassed because a circuit breaker is open.
    CircuitOpen,
    /// The call was abandoned because of shutdown or batch cancellation.
    Cancelled,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// Error classes that own a circuit breaker and are consulted before each call.
    pub const BREAKER_KINDS: [ErrorKind; 5] = [
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::RateLimit,
        ErrorKind::ServerError,
        ErrorKind::Api,
    ];

    /// Returns the stable key used for circuit breakers, metrics tags and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::Api => "API",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Whether errors of this class are transient by nature.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::RateLimit
                | ErrorKind::ServerError
                | ErrorKind::Api
        )
    }

    /// Classifies an untagged error message by its signature.
    ///
    /// Returns `Unknown` when no known signature is present.
    pub fn from_message(message: &str) -> ErrorKind {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            ErrorKind::Timeout
        } else if lower.contains("connection")
            || lower.contains("socket")
            || lower.contains("network")
        {
            ErrorKind::Network
        } else if lower.contains("rate limit")
            || lower.contains("quota")
            || lower.contains("throttle")
        {
            ErrorKind::RateLimit
        } else if lower.contains("server error")
            || lower.contains("internal error")
            || lower.contains("service unavailable")
        {
            ErrorKind::ServerError
        } else {
            ErrorKind::Unknown
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-specific errors for timeline generation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DomainError {
    /// Request or work unit failed validation.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Network-level failure talking to the upstream API.
    #[error("network error: {message}")]
    Network { message: String },

    /// Upstream call exceeded its deadline.
    #[error("timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Upstream throttled the call.
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Upstream reported a server-side failure.
    #[error("server error: {message}")]
    Server { message: String },

    /// Upstream returned an unusable response.
    #[error("api error: {message}")]
    Api { message: String },

    /// Call bypassed because the breaker for `key` is open.
    #[error("circuit open for {key}")]
    CircuitOpen { key: String },

    /// Work was cancelled before it finished.
    #[error("operation cancelled")]
    Cancelled,

    /// Untagged failure; classified by message signature.
    #[error("{message}")]
    Other { message: String },
}

impl DomainError {
    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        DomainError::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for an untagged error.
    pub fn other(message: impl Into<String>) -> Self {
        DomainError::Other {
            message: message.into(),
        }
    }

    /// Returns the error class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation { .. } => ErrorKind::Validation,
            DomainError::Network { .. } => ErrorKind::Network,
            DomainError::Timeout { .. } => ErrorKind::Timeout,
            DomainError::RateLimited { .. } => ErrorKind::RateLimit,
            DomainError::Server { .. } => ErrorKind::ServerError,
            DomainError::Api { .. } => ErrorKind::Api,
            DomainError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            DomainError::Cancelled => ErrorKind::Cancelled,
            DomainError::Other { message } => ErrorKind::from_message(message),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Failure surfaced by the retry/fallback executor after recovery is exhausted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResilienceError {
    /// Both the primary operation and its fallback failed.
    #[error("operation failed ({primary}); fallback also failed ({fallback})")]
    FallbackFailed {
        primary: DomainError,
        fallback: DomainError,
    },

    /// Shutdown interrupted the backoff sleep.
    #[error("cancelled while retrying after: {last}")]
    Cancelled { last: DomainError },
}

impl ResilienceError {
    /// The error raised by the primary operation.
    pub fn primary(&self) -> &DomainError {
        match self {
            ResilienceError::FallbackFailed { primary, .. } => primary,
            ResilienceError::Cancelled { last } => last,
        }
    }

    /// Error class reported for the whole failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::FallbackFailed { primary, .. } => primary.kind(),
            ResilienceError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}
