//! In-memory store implementations.
//!
//! Both stores sit on `DashMap`, so concurrent callers contend only on the
//! shard holding their key. Creation cache entries are keyed by fingerprint,
//! which makes the at-most-one-active-entry rule a single entry-API insert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use timeweave_domain::model::{EventItem, TimelineRequest};
use timeweave_domain::RequestFingerprint;

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    normalize_name, validate_entry, validate_limit, validate_requester, CreationCacheEntry,
    CreationStatus, FingerprintStore, InsertOutcome, ResultRef, ResultStore, StoredResult,
};

/// In-memory implementation of [`FingerprintStore`].
///
/// # Performance Characteristics
///
/// - **find / insert_if_absent**: O(1) average (DashMap keyed by fingerprint)
/// - **update_status**: O(1) average (id index, then fingerprint lookup)
/// - **find_recent_by_requester / purge_expired**: O(N) scan
#[derive(Debug, Default)]
pub struct MemoryFingerprintStore {
    entries: DashMap<RequestFingerprint, CreationCacheEntry>,
    /// Secondary index: entry id -> fingerprint.
    ids: DashMap<Uuid, RequestFingerprint>,
}

impl MemoryFingerprintStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl FingerprintStore for MemoryFingerprintStore {
    async fn find(
        &self,
        fingerprint: &RequestFingerprint,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<CreationCacheEntry>> {
        Ok(self
            .entries
            .get(fingerprint)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value().clone()))
    }

    #[instrument(skip(self, entry), fields(fingerprint = %entry.fingerprint, id = %entry.id))]
    async fn insert_if_absent(
        &self,
        entry: CreationCacheEntry,
        now: DateTime<Utc>,
    ) -> StorageResult<InsertOutcome> {
        validate_entry(&entry)?;

        // The shard lock is held from check to insert, so concurrent identical
        // fingerprints serialize here.
        match self.entries.entry(entry.fingerprint.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_active(now) {
                    return Ok(InsertOutcome::Existing(occupied.get().clone()));
                }
                let replaced = occupied.insert(entry.clone());
                self.ids.remove(&replaced.id);
                self.ids.insert(entry.id, entry.fingerprint.clone());
                debug!(
                    replaced_status = %replaced.status,
                    "replaced stale creation cache entry"
                );
                Ok(InsertOutcome::Inserted(entry))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
                self.ids.insert(entry.id, entry.fingerprint.clone());
                Ok(InsertOutcome::Inserted(entry))
            }
        }
    }

    #[instrument(skip(self, result_id))]
    async fn update_status(
        &self,
        id: Uuid,
        status: CreationStatus,
        result_id: Option<String>,
    ) -> StorageResult<CreationCacheEntry> {
        let fingerprint = self
            .ids
            .get(&id)
            .map(|f| f.value().clone())
            .ok_or(StorageError::EntryNotFound { id })?;

        let mut entry = self
            .entries
            .get_mut(&fingerprint)
            .filter(|e| e.id == id)
            .ok_or(StorageError::EntryNotFound { id })?;

        entry.status = status;
        if result_id.is_some() {
            entry.result_id = result_id;
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn find_recent_by_requester(
        &self,
        requester: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<CreationCacheEntry>> {
        validate_requester(requester)?;
        let requester = requester.trim();
        let mut entries: Vec<CreationCacheEntry> = self
            .entries
            .iter()
            .filter(|e| e.requester == requester && e.created_at >= since)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let mut removed = Vec::new();
        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed.push(entry.id);
                false
            } else {
                true
            }
        });
        for id in &removed {
            self.ids.remove(id);
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "purged expired creation cache entries");
        }
        Ok(removed.len())
    }
}

/// In-memory implementation of [`ResultStore`].
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    results: DashMap<String, StoredResult>,
}

impl MemoryResultStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Inserts a result with an explicit creation time.
    ///
    /// Lets callers seed history (e.g., results created before a restart).
    pub fn insert_at(
        &self,
        request: &TimelineRequest,
        items: Vec<EventItem>,
        created_at: DateTime<Utc>,
    ) -> ResultRef {
        let reference = ResultRef {
            id: Uuid::new_v4().to_string(),
            name: request.name.trim().to_string(),
            requester: request.requester.trim().to_string(),
            start: request.start,
            end: request.end,
            created_at,
        };
        self.results.insert(
            reference.id.clone(),
            StoredResult {
                reference: reference.clone(),
                description: request.description.clone(),
                scope_ids: request.scope_ids.clone(),
                items,
            },
        );
        reference
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    fn newest_first(&self, filter: impl Fn(&ResultRef) -> bool) -> Vec<ResultRef> {
        let mut refs: Vec<ResultRef> = self
            .results
            .iter()
            .map(|r| r.value().reference.clone())
            .filter(|r| filter(r))
            .collect();
        refs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        refs
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    #[instrument(skip(self, request, items), fields(name = %request.name, items = items.len()))]
    async fn persist(
        &self,
        request: &TimelineRequest,
        items: Vec<EventItem>,
    ) -> StorageResult<ResultRef> {
        validate_requester(&request.requester)?;
        Ok(self.insert_at(request, items, Utc::now()))
    }

    async fn get(&self, id: &str) -> StorageResult<StoredResult> {
        self.results
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StorageError::ResultNotFound { id: id.to_string() })
    }

    async fn find_by_name_and_range(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Option<ResultRef>> {
        let name = normalize_name(name);
        Ok(self
            .newest_first(|r| normalize_name(&r.name) == name && r.start == start && r.end == end)
            .into_iter()
            .next())
    }

    async fn find_in_time_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tolerance: Duration,
        limit: usize,
    ) -> StorageResult<Vec<ResultRef>> {
        validate_limit(limit)?;
        let within = |a: DateTime<Utc>, b: DateTime<Utc>| (a - b).abs() <= tolerance;
        let mut refs = self.newest_first(|r| within(r.start, start) && within(r.end, end));
        refs.truncate(limit);
        Ok(refs)
    }

    async fn find_recent_by_requester(
        &self,
        requester: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<ResultRef>> {
        validate_requester(requester)?;
        let requester = requester.trim();
        Ok(self.newest_first(|r| r.requester == requester && r.created_at >= since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(name: &str) -> TimelineRequest {
        TimelineRequest::new(
            name,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap(),
            "user-1",
        )
    }

    fn entry(name: &str, now: DateTime<Utc>) -> CreationCacheEntry {
        let request = request(name);
        CreationCacheEntry::in_progress(
            RequestFingerprint::of(&request),
            &request,
            Duration::minutes(30),
            now,
        )
    }

    #[tokio::test]
    async fn test_memory_store_can_be_created() {
        let store = MemoryFingerprintStore::new();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_insert_then_find() {
        let store = MemoryFingerprintStore::new();
        let now = Utc::now();
        let e = entry("Floods", now);

        let outcome = store.insert_if_absent(e.clone(), now).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted(e.clone()));

        let found = store.find(&e.fingerprint, now).await.unwrap();
        assert_eq!(found, Some(e));
    }

    #[tokio::test]
    async fn test_second_insert_observes_existing() {
        let store = MemoryFingerprintStore::new();
        let now = Utc::now();
        let first = entry("Floods", now);
        let second = entry("Floods", now);
        assert_ne!(first.id, second.id);

        store.insert_if_absent(first.clone(), now).await.unwrap();
        let outcome = store.insert_if_absent(second, now).await.unwrap();

        assert_eq!(outcome, InsertOutcome::Existing(first));
    }

    #[tokio::test]
    async fn test_expired_entry_is_invisible_and_replaceable() {
        let store = MemoryFingerprintStore::new();
        let now = Utc::now();
        let old = entry("Floods", now);
        store.insert_if_absent(old.clone(), now).await.unwrap();

        let later = now + Duration::minutes(31);
        assert_eq!(store.find(&old.fingerprint, later).await.unwrap(), None);

        let fresh = entry("Floods", later);
        let outcome = store.insert_if_absent(fresh.clone(), later).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted(fresh));
        assert!(matches!(
            store.update_status(old.id, CreationStatus::Completed, None).await,
            Err(StorageError::EntryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_entry_is_replaced() {
        let store = MemoryFingerprintStore::new();
        let now = Utc::now();
        let failed = entry("Floods", now);
        store.insert_if_absent(failed.clone(), now).await.unwrap();
        store
            .update_status(failed.id, CreationStatus::Failed, None)
            .await
            .unwrap();

        let retry = entry("Floods", now);
        let outcome = store.insert_if_absent(retry.clone(), now).await.unwrap();

        assert_eq!(outcome, InsertOutcome::Inserted(retry));
    }

    #[tokio::test]
    async fn test_update_status_records_result() {
        let store = MemoryFingerprintStore::new();
        let now = Utc::now();
        let e = entry("Floods", now);
        store.insert_if_absent(e.clone(), now).await.unwrap();

        let updated = store
            .update_status(e.id, CreationStatus::Completed, Some("r-1".into()))
            .await
            .unwrap();

        assert_eq!(updated.status, CreationStatus::Completed);
        assert_eq!(updated.result_id.as_deref(), Some("r-1"));
        assert_eq!(updated.expires_at, e.expires_at);
    }

    #[tokio::test]
    async fn test_update_unknown_id_fails() {
        let store = MemoryFingerprintStore::new();
        let err = store
            .update_status(Uuid::new_v4(), CreationStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EntryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_purge_expired_removes_only_expired() {
        let store = MemoryFingerprintStore::new();
        let now = Utc::now();
        store
            .insert_if_absent(entry("Old", now - Duration::hours(1)), now - Duration::hours(1))
            .await
            .unwrap();
        store.insert_if_absent(entry("New", now), now).await.unwrap();

        let removed = store.purge_expired(now).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_result_store_lookups() {
        let store = MemoryResultStore::new();
        let now = Utc::now();
        let older = store.insert_at(&request("Floods"), vec![], now - Duration::hours(2));
        let newer = store.insert_at(&request("floods "), vec![], now);

        let by_name = store
            .find_by_name_and_range(
                "FLOODS",
                request("x").start,
                request("x").end,
            )
            .await
            .unwrap();
        assert_eq!(by_name, Some(newer.clone()));

        let recent = store
            .find_recent_by_requester("user-1", now - Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(recent, vec![newer.clone()]);

        let window = store
            .find_in_time_window(
                request("x").start + Duration::hours(12),
                request("x").end - Duration::hours(12),
                Duration::days(1),
                100,
            )
            .await
            .unwrap();
        assert_eq!(window, vec![newer, older]);
    }

    #[tokio::test]
    async fn test_get_missing_result_fails() {
        let store = MemoryResultStore::new();
        assert!(matches!(
            store.get("nope").await,
            Err(StorageError::ResultNotFound { .. })
        ));
    }
}
