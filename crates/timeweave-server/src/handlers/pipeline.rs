//! End-to-end timeline generation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use timeweave_domain::model::TimelineRequest;
use timeweave_domain::segmentation::{segment_time_range, SegmentationConfig};
use timeweave_domain::DomainError;
use timeweave_storage::{CreationCacheEntry, ResultRef, ResultStore, StorageError};

use super::batch::{BatchCoordinator, BatchResult};
use super::dedup::{DuplicateReason, DuplicationError, DuplicationSuppressor};

/// Outcome of a generation request.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// The request repeats earlier or in-flight work; nothing was generated.
    Duplicate {
        existing: Option<ResultRef>,
        entry: Option<CreationCacheEntry>,
        reason: DuplicateReason,
    },
    /// A new timeline was generated and persisted.
    Created {
        result_id: String,
        entry_id: Uuid,
        batch: BatchResult,
    },
}

/// Errors that abort a generation request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    InvalidRequest(DomainError),

    #[error("duplication check failed: {0}")]
    Duplication(#[from] DuplicationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("generation cancelled")]
    Cancelled,

    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Suppress, segment, execute, persist.
///
/// Degraded batches (some units failed or timed out) are still persisted;
/// the counters in the returned [`BatchResult`] report the degradation.
pub struct TimelinePipeline {
    suppressor: Arc<DuplicationSuppressor>,
    coordinator: Arc<BatchCoordinator>,
    results: Arc<dyn ResultStore>,
    segmentation: SegmentationConfig,
}

impl TimelinePipeline {
    pub fn new(
        suppressor: Arc<DuplicationSuppressor>,
        coordinator: Arc<BatchCoordinator>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            suppressor,
            coordinator,
            results,
            segmentation: SegmentationConfig::default(),
        }
    }

    pub fn with_segmentation(mut self, segmentation: SegmentationConfig) -> Self {
        self.segmentation = segmentation;
        self
    }

    pub fn coordinator(&self) -> &Arc<BatchCoordinator> {
        &self.coordinator
    }

    pub fn suppressor(&self) -> &Arc<DuplicationSuppressor> {
        &self.suppressor
    }

    pub async fn generate(
        &self,
        request: TimelineRequest,
    ) -> Result<GenerationOutcome, PipelineError> {
        self.generate_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Generates a timeline, giving up when `cancel` fires.
    ///
    /// Once the request is registered, any error or cancellation leaves its
    /// creation entry FAILED.
    #[instrument(
        skip(self, request, cancel),
        fields(name = %request.name, requester = %request.requester)
    )]
    pub async fn generate_with_cancel(
        &self,
        request: TimelineRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationOutcome, PipelineError> {
        request.validate().map_err(PipelineError::InvalidRequest)?;

        let check = self.suppressor.check_duplication(&request).await?;
        if check.duplicate {
            let reason = check.reason.ok_or_else(|| PipelineError::Internal {
                message: "duplicate verdict without a reason".to_string(),
            })?;
            return Ok(GenerationOutcome::Duplicate {
                existing: check.existing,
                entry: check.cache_entry,
                reason,
            });
        }

        let entry = check.cache_entry.ok_or_else(|| PipelineError::Internal {
            message: "novel request without a creation entry".to_string(),
        })?;
        let guard = self.suppressor.guard(&entry);

        let request = Arc::new(request);
        let units = segment_time_range(Arc::clone(&request), &self.segmentation)
            .map_err(PipelineError::InvalidRequest)?;
        let unit_count = units.len();

        let batch = self
            .coordinator
            .execute_batch_with_cancel(units, cancel.clone())
            .await;
        if cancel.is_cancelled() {
            warn!(entry_id = %entry.id, "generation cancelled");
            guard.fail().await?;
            return Err(PipelineError::Cancelled);
        }
        if batch.is_degraded() {
            warn!(
                attempted = batch.counters.attempted,
                succeeded = batch.counters.succeeded,
                "persisting degraded timeline"
            );
        }

        let reference = self.results.persist(&request, batch.items.clone()).await?;
        guard.complete(reference.id.clone()).await?;

        info!(
            result_id = %reference.id,
            units = unit_count,
            items = batch.items.len(),
            "timeline created"
        );
        Ok(GenerationOutcome::Created {
            result_id: reference.id,
            entry_id: entry.id,
            batch,
        })
    }
}

impl std::fmt::Debug for TimelinePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelinePipeline")
            .field("coordinator", &self.coordinator)
            .field("suppressor", &self.suppressor)
            .field("segmentation", &self.segmentation)
            .finish_non_exhaustive()
    }
}
