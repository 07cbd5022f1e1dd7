//! Data types for duplicate-request suppression.

use std::time::Duration;

use serde::Serialize;

use timeweave_domain::DomainError;
use timeweave_storage::{CreationCacheEntry, ResultRef, StorageError};

/// How long an accepted request blocks identical submissions.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Window in which a requester's own result with the same name counts.
pub const DEFAULT_RECENT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Minimum name similarity for a strict-mode match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Allowed drift of start and end for a strict-mode match.
pub const DEFAULT_SIMILARITY_TOLERANCE: Duration = Duration::from_secs(24 * 60 * 60);

/// Most candidates examined by a strict-mode match.
pub const DEFAULT_SIMILARITY_CANDIDATES: usize = 100;

/// Configuration for the duplication suppressor.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicationConfig {
    pub cache_ttl: Duration,
    pub recent_window: Duration,
    /// Enables fuzzy name matching against nearby results.
    pub strict_mode: bool,
    pub similarity_threshold: f64,
    pub similarity_tolerance: Duration,
    pub similarity_candidates: usize,
}

impl Default for DuplicationConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            recent_window: DEFAULT_RECENT_WINDOW,
            strict_mode: false,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            similarity_tolerance: DEFAULT_SIMILARITY_TOLERANCE,
            similarity_candidates: DEFAULT_SIMILARITY_CANDIDATES,
        }
    }
}

impl DuplicationConfig {
    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn with_recent_window(mut self, recent_window: Duration) -> Self {
        self.recent_window = recent_window;
        self
    }

    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.strict_mode = strict_mode;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn validate(&self) -> DuplicationResult<()> {
        if self.cache_ttl.is_zero() {
            return Err(DuplicationError::InvalidConfig {
                message: "cache_ttl must be greater than 0".to_string(),
            });
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(DuplicationError::InvalidConfig {
                message: format!(
                    "similarity_threshold must be in (0, 1], got {}",
                    self.similarity_threshold
                ),
            });
        }
        if self.similarity_candidates == 0 {
            return Err(DuplicationError::InvalidConfig {
                message: "similarity_candidates must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Which rule matched a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum DuplicateReason {
    /// Identical canonical request already accepted.
    Fingerprint,
    /// Same normalized name and exact range already persisted.
    ExactMatch,
    /// Similar name over a nearly identical range (strict mode).
    SimilarName { similarity: f64 },
    /// The requester just created a timeline with this name.
    RecentSubmission,
}

impl DuplicateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateReason::Fingerprint => "fingerprint",
            DuplicateReason::ExactMatch => "exact_match",
            DuplicateReason::SimilarName { .. } => "similar_name",
            DuplicateReason::RecentSubmission => "recent_submission",
        }
    }
}

/// Verdict of a duplication check.
///
/// A novel request carries the IN_PROGRESS entry registered for it; the
/// caller owns that entry and must complete or fail it.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicationCheck {
    pub duplicate: bool,
    pub reason: Option<DuplicateReason>,
    /// The persisted result this request duplicates, when one exists.
    pub existing: Option<ResultRef>,
    pub cache_entry: Option<CreationCacheEntry>,
}

impl DuplicationCheck {
    pub(crate) fn novel(entry: CreationCacheEntry) -> Self {
        Self {
            duplicate: false,
            reason: None,
            existing: None,
            cache_entry: Some(entry),
        }
    }

    pub(crate) fn duplicate(
        reason: DuplicateReason,
        existing: Option<ResultRef>,
        cache_entry: Option<CreationCacheEntry>,
    ) -> Self {
        Self {
            duplicate: true,
            reason: Some(reason),
            existing,
            cache_entry,
        }
    }
}

/// Errors from the duplication suppressor.
#[derive(Debug, thiserror::Error)]
pub enum DuplicationError {
    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(DomainError),

    #[error("invalid duplication config: {message}")]
    InvalidConfig { message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for duplication operations.
pub type DuplicationResult<T> = Result<T, DuplicationError>;
