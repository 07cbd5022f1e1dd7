//! Duplicate-request suppressor implementation.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use timeweave_domain::model::TimelineRequest;
use timeweave_domain::similarity::name_similarity;
use timeweave_domain::telemetry::{MetricsSink, NoopMetrics};
use timeweave_domain::RequestFingerprint;
use timeweave_storage::traits::normalize_name;
use timeweave_storage::{
    CreationCacheEntry, CreationStatus, FingerprintStore, InsertOutcome, ResultRef, ResultStore,
    StorageError,
};

use super::guard::CreationGuard;
use super::types::{
    DuplicateReason, DuplicationCheck, DuplicationConfig, DuplicationError, DuplicationResult,
};
use crate::observability::names;

/// Decides whether a timeline request repeats earlier work.
///
/// Rules are checked in order and the first match wins:
///
/// 1. An active (non-expired, non-FAILED) entry with the same fingerprint
/// 2. A persisted result with the same normalized name and exact range
/// 3. In strict mode, a persisted result with a similar name whose start
///    and end each lie within the similarity tolerance
/// 4. A result or active entry from the same requester with the same
///    name inside the recent window
///
/// A request that matches nothing is registered atomically as IN_PROGRESS,
/// so of two concurrent identical requests exactly one is novel.
pub struct DuplicationSuppressor {
    fingerprints: Arc<dyn FingerprintStore>,
    results: Arc<dyn ResultStore>,
    config: DuplicationConfig,
    cache_ttl: ChronoDuration,
    recent_window: ChronoDuration,
    similarity_tolerance: ChronoDuration,
    metrics: Arc<dyn MetricsSink>,
}

impl DuplicationSuppressor {
    /// Creates a suppressor, validating `config`.
    pub fn new(
        fingerprints: Arc<dyn FingerprintStore>,
        results: Arc<dyn ResultStore>,
        config: DuplicationConfig,
    ) -> DuplicationResult<Self> {
        config.validate()?;
        Ok(Self {
            cache_ttl: to_chrono(config.cache_ttl, "cache_ttl")?,
            recent_window: to_chrono(config.recent_window, "recent_window")?,
            similarity_tolerance: to_chrono(config.similarity_tolerance, "similarity_tolerance")?,
            fingerprints,
            results,
            config,
            metrics: Arc::new(NoopMetrics),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &DuplicationConfig {
        &self.config
    }

    /// The store holding creation entries.
    pub fn fingerprint_store(&self) -> &Arc<dyn FingerprintStore> {
        &self.fingerprints
    }

    /// Checks `request` against the duplication rules, registering it when novel.
    #[instrument(skip(self, request), fields(name = %request.name, requester = %request.requester))]
    pub async fn check_duplication(
        &self,
        request: &TimelineRequest,
    ) -> DuplicationResult<DuplicationCheck> {
        request
            .validate()
            .map_err(DuplicationError::InvalidRequest)?;

        let now = Utc::now();
        let fingerprint = RequestFingerprint::of(request);

        if let Some(entry) = self.fingerprints.find(&fingerprint, now).await? {
            if entry.status != CreationStatus::Failed {
                let existing = self.resolve(&entry).await?;
                return Ok(self.report(DuplicateReason::Fingerprint, existing, Some(entry)));
            }
        }

        if let Some(existing) = self
            .results
            .find_by_name_and_range(&request.name, request.start, request.end)
            .await?
        {
            return Ok(self.report(DuplicateReason::ExactMatch, Some(existing), None));
        }

        if self.config.strict_mode {
            if let Some((existing, similarity)) = self.find_similar(request).await? {
                return Ok(self.report(
                    DuplicateReason::SimilarName { similarity },
                    Some(existing),
                    None,
                ));
            }
        }

        if let Some(check) = self.find_recent(request, now).await? {
            return Ok(check);
        }

        let entry = CreationCacheEntry::in_progress(fingerprint, request, self.cache_ttl, now);
        match self.fingerprints.insert_if_absent(entry, now).await? {
            InsertOutcome::Inserted(entry) => {
                debug!(entry_id = %entry.id, "request registered");
                Ok(DuplicationCheck::novel(entry))
            }
            InsertOutcome::Existing(entry) => {
                debug!(entry_id = %entry.id, "lost registration race");
                let existing = self.resolve(&entry).await?;
                Ok(self.report(DuplicateReason::Fingerprint, existing, Some(entry)))
            }
        }
    }

    /// Wraps a registered entry in a guard that fails it unless completed.
    pub fn guard(&self, entry: &CreationCacheEntry) -> CreationGuard {
        CreationGuard::new(Arc::clone(&self.fingerprints), entry.id)
    }

    /// Marks the entry COMPLETED with its persisted result.
    #[instrument(skip(self, result_id))]
    pub async fn mark_completed(
        &self,
        entry_id: Uuid,
        result_id: impl Into<String>,
    ) -> DuplicationResult<CreationCacheEntry> {
        Ok(self
            .fingerprints
            .update_status(entry_id, CreationStatus::Completed, Some(result_id.into()))
            .await?)
    }

    /// Marks the entry FAILED so identical requests are accepted again.
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, entry_id: Uuid) -> DuplicationResult<CreationCacheEntry> {
        Ok(self
            .fingerprints
            .update_status(entry_id, CreationStatus::Failed, None)
            .await?)
    }

    async fn find_similar(
        &self,
        request: &TimelineRequest,
    ) -> DuplicationResult<Option<(ResultRef, f64)>> {
        let candidates = self
            .results
            .find_in_time_window(
                request.start,
                request.end,
                self.similarity_tolerance,
                self.config.similarity_candidates,
            )
            .await?;

        let name = normalize_name(&request.name);
        Ok(candidates.into_iter().find_map(|candidate| {
            let similarity = name_similarity(&name, &normalize_name(&candidate.name));
            (similarity >= self.config.similarity_threshold).then_some((candidate, similarity))
        }))
    }

    async fn find_recent(
        &self,
        request: &TimelineRequest,
        now: DateTime<Utc>,
    ) -> DuplicationResult<Option<DuplicationCheck>> {
        let since = now - self.recent_window;
        let name = normalize_name(&request.name);

        let recent_result = self
            .results
            .find_recent_by_requester(&request.requester, since)
            .await?
            .into_iter()
            .find(|r| normalize_name(&r.name) == name);
        if let Some(existing) = recent_result {
            return Ok(Some(self.report(
                DuplicateReason::RecentSubmission,
                Some(existing),
                None,
            )));
        }

        let recent_entry = self
            .fingerprints
            .find_recent_by_requester(&request.requester, since)
            .await?
            .into_iter()
            .find(|e| e.is_active(now) && normalize_name(&e.name) == name);
        match recent_entry {
            Some(entry) => {
                let existing = self.resolve(&entry).await?;
                Ok(Some(self.report(
                    DuplicateReason::RecentSubmission,
                    existing,
                    Some(entry),
                )))
            }
            None => Ok(None),
        }
    }

    /// Looks up the result a completed entry points at.
    async fn resolve(&self, entry: &CreationCacheEntry) -> DuplicationResult<Option<ResultRef>> {
        let Some(result_id) = entry.result_id.as_deref() else {
            return Ok(None);
        };
        match self.results.get(result_id).await {
            Ok(stored) => Ok(Some(stored.reference)),
            Err(StorageError::ResultNotFound { .. }) => {
                warn!(entry_id = %entry.id, result_id, "entry points at a missing result");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn report(
        &self,
        reason: DuplicateReason,
        existing: Option<ResultRef>,
        entry: Option<CreationCacheEntry>,
    ) -> DuplicationCheck {
        info!(
            reason = reason.as_str(),
            existing = existing.as_ref().map(|r| r.id.as_str()),
            "duplicate request"
        );
        self.metrics.record(
            names::DUPLICATES_DETECTED_TOTAL,
            1.0,
            &[("reason", reason.as_str())],
        );
        DuplicationCheck::duplicate(reason, existing, entry)
    }
}

impl std::fmt::Debug for DuplicationSuppressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicationSuppressor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn to_chrono(duration: std::time::Duration, field: &str) -> DuplicationResult<ChronoDuration> {
    ChronoDuration::from_std(duration).map_err(|_| DuplicationError::InvalidConfig {
        message: format!("{field} is out of range"),
    })
}
