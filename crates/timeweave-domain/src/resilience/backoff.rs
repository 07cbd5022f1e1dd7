//! Retry classification and exponential backoff.

use std::time::Duration;

use crate::error::{DomainError, ErrorKind};

/// Untagged errors of unknown class are retried while fewer than this many
/// retries have been spent.
pub const UNKNOWN_RETRY_LIMIT: u32 = 2;

/// Bounded exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling applied to every delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `retry` (1-based): `min(base * 2^retry, max)`.
    ///
    /// Saturates instead of overflowing for large retry numbers.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}

/// Decides whether a failed attempt should be retried.
///
/// `retries_done` counts retries already spent (0 after the first attempt).
/// Exhausting `max_retries` forces `false`. Validation, circuit-open and
/// cancellation are never retried; unknown errors get at most
/// [`UNKNOWN_RETRY_LIMIT`] retries.
pub fn should_retry(error: &DomainError, retries_done: u32, max_retries: u32) -> bool {
    if retries_done >= max_retries {
        return false;
    }
    match error.kind() {
        ErrorKind::Validation | ErrorKind::CircuitOpen | ErrorKind::Cancelled => false,
        ErrorKind::Unknown => retries_done < UNKNOWN_RETRY_LIMIT,
        kind => kind.is_transient(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(16_000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(64), Duration::from_millis(30_000));
    }

    #[test]
    fn test_validation_errors_are_never_retried() {
        let err = DomainError::validation("missing name");
        assert!(!should_retry(&err, 0, 3));
    }

    #[test]
    fn test_transient_errors_retry_until_budget_exhausted() {
        let err = DomainError::Network {
            message: "connection reset".into(),
        };
        assert!(should_retry(&err, 0, 3));
        assert!(should_retry(&err, 2, 3));
        assert!(!should_retry(&err, 3, 3));
    }

    #[test]
    fn test_unknown_errors_get_two_retries() {
        let err = DomainError::other("unexpected token in response");
        assert!(should_retry(&err, 0, 5));
        assert!(should_retry(&err, 1, 5));
        assert!(!should_retry(&err, 2, 5));
    }

    #[test]
    fn test_untagged_signatures_are_retryable() {
        let err = DomainError::other("upstream said: rate limit exceeded");
        assert!(should_retry(&err, 0, 3));
    }

    #[test]
    fn test_circuit_open_and_cancelled_are_not_retried() {
        let open = DomainError::CircuitOpen {
            key: "NETWORK".into(),
        };
        assert!(!should_retry(&open, 0, 3));
        assert!(!should_retry(&DomainError::Cancelled, 0, 3));
    }

    proptest! {
        #[test]
        fn prop_delay_is_monotonic_and_capped(
            base_ms in 1u64..5_000,
            cap_ms in 1u64..120_000,
            retry in 0u32..40,
        ) {
            let policy = RetryPolicy::default()
                .with_base_delay(Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_millis(cap_ms));
            let current = policy.delay_for(retry);
            let next = policy.delay_for(retry + 1);
            prop_assert!(current <= policy.max_delay);
            prop_assert!(current <= next);
        }
    }
}
