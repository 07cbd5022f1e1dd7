//! Store trait definitions for creation cache entries and timeline results.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use timeweave_domain::model::{EventItem, TimelineRequest};
use timeweave_domain::RequestFingerprint;

use crate::error::{StorageError, StorageResult};

/// Largest candidate set a time-window query may return.
pub const MAX_WINDOW_LIMIT: usize = 1000;

/// Lifecycle of a creation cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreationStatus {
    InProgress,
    Completed,
    Failed,
}

impl CreationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreationStatus::InProgress => "IN_PROGRESS",
            CreationStatus::Completed => "COMPLETED",
            CreationStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CreationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker recording that a request with a given fingerprint was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationCacheEntry {
    pub id: Uuid,
    pub fingerprint: RequestFingerprint,
    pub status: CreationStatus,
    /// Set once the result is persisted.
    pub result_id: Option<String>,
    pub requester: String,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CreationCacheEntry {
    /// Creates an IN_PROGRESS entry for `request`, expiring `ttl` after `now`.
    pub fn in_progress(
        fingerprint: RequestFingerprint,
        request: &TimelineRequest,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            status: CreationStatus::InProgress,
            result_id: None,
            requester: request.requester.trim().to_string(),
            name: request.name.trim().to_string(),
            start: request.start,
            end: request.end,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    /// Whether the entry's TTL has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the entry still blocks identical submissions at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.status != CreationStatus::Failed
    }
}

/// Result of an atomic insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The entry was stored; the caller owns the work.
    Inserted(CreationCacheEntry),
    /// An active entry already holds the fingerprint.
    Existing(CreationCacheEntry),
}

/// Reference to a persisted timeline result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRef {
    pub id: String,
    pub name: String,
    pub requester: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A persisted timeline result with its merged events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub reference: ResultRef,
    pub description: Option<String>,
    pub scope_ids: Vec<i64>,
    pub items: Vec<EventItem>,
}

/// Persistence for creation cache entries.
///
/// Implementations must be thread-safe (Send + Sync) and must perform
/// `insert_if_absent` as a single atomic check-then-insert.
#[async_trait]
pub trait FingerprintStore: Send + Sync + 'static {
    /// Returns the non-expired entry for `fingerprint`, whatever its status.
    async fn find(
        &self,
        fingerprint: &RequestFingerprint,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<CreationCacheEntry>>;

    /// Stores `entry` unless an active entry holds its fingerprint.
    ///
    /// Expired and FAILED entries are replaced.
    async fn insert_if_absent(
        &self,
        entry: CreationCacheEntry,
        now: DateTime<Utc>,
    ) -> StorageResult<InsertOutcome>;

    /// Transitions the entry with `id` to `status`.
    async fn update_status(
        &self,
        id: Uuid,
        status: CreationStatus,
        result_id: Option<String>,
    ) -> StorageResult<CreationCacheEntry>;

    /// Entries created by `requester` at or after `since`, newest first.
    async fn find_recent_by_requester(
        &self,
        requester: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<CreationCacheEntry>>;

    /// Removes entries expired at `now`; returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize>;
}

/// Durable storage of merged timeline results.
#[async_trait]
pub trait ResultStore: Send + Sync + 'static {
    /// Stores the merged items for `request`; returns the new reference.
    async fn persist(
        &self,
        request: &TimelineRequest,
        items: Vec<EventItem>,
    ) -> StorageResult<ResultRef>;

    /// Gets a result by id.
    async fn get(&self, id: &str) -> StorageResult<StoredResult>;

    /// Newest result whose normalized name and exact range match.
    async fn find_by_name_and_range(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Option<ResultRef>>;

    /// Results whose start and end each lie within `tolerance` of the given
    /// bounds, newest first, at most `limit`.
    async fn find_in_time_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tolerance: Duration,
        limit: usize,
    ) -> StorageResult<Vec<ResultRef>>;

    /// Results created by `requester` at or after `since`, newest first.
    async fn find_recent_by_requester(
        &self,
        requester: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<ResultRef>>;
}

pub use timeweave_domain::model::normalize_name;

/// Validates a requester identity.
pub fn validate_requester(requester: &str) -> StorageResult<()> {
    if requester.trim().is_empty() {
        return Err(StorageError::InvalidInput {
            message: "requester cannot be empty".to_string(),
        });
    }
    Ok(())
}

/// Validates a creation cache entry before insertion.
pub fn validate_entry(entry: &CreationCacheEntry) -> StorageResult<()> {
    if entry.fingerprint.as_str().is_empty() {
        return Err(StorageError::InvalidInput {
            message: "fingerprint cannot be empty".to_string(),
        });
    }
    validate_requester(&entry.requester)?;
    if entry.expires_at <= entry.created_at {
        return Err(StorageError::InvalidInput {
            message: format!(
                "entry expires at {} before it was created at {}",
                entry.expires_at, entry.created_at
            ),
        });
    }
    Ok(())
}

/// Validates a time-window query limit.
pub fn validate_limit(limit: usize) -> StorageResult<()> {
    if limit == 0 || limit > MAX_WINDOW_LIMIT {
        return Err(StorageError::InvalidInput {
            message: format!("limit must be between 1 and {MAX_WINDOW_LIMIT}, got {limit}"),
        });
    }
    Ok(())
}
