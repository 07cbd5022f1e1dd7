//! Scoped ownership of an IN_PROGRESS creation entry.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use timeweave_storage::{CreationCacheEntry, CreationStatus, FingerprintStore, StorageResult};

/// Marks its entry FAILED if dropped before `complete` or `fail` succeeds.
///
/// Covers panics, early `?` returns and cancelled futures, so an abandoned
/// request stops blocking identical submissions right away instead of
/// after the TTL. The drop-time update is spawned on the current runtime;
/// without one the entry is left to expire.
#[must_use = "dropping the guard marks the entry FAILED"]
pub struct CreationGuard {
    store: Arc<dyn FingerprintStore>,
    entry_id: Uuid,
    finished: bool,
}

impl CreationGuard {
    pub(crate) fn new(store: Arc<dyn FingerprintStore>, entry_id: Uuid) -> Self {
        Self {
            store,
            entry_id,
            finished: false,
        }
    }

    pub fn entry_id(&self) -> Uuid {
        self.entry_id
    }

    /// Marks the entry COMPLETED with the persisted result id.
    pub async fn complete(
        mut self,
        result_id: impl Into<String>,
    ) -> StorageResult<CreationCacheEntry> {
        let updated = self
            .store
            .update_status(self.entry_id, CreationStatus::Completed, Some(result_id.into()))
            .await;
        self.finished = updated.is_ok();
        updated
    }

    /// Marks the entry FAILED now rather than on drop.
    pub async fn fail(mut self) -> StorageResult<CreationCacheEntry> {
        // Whatever the outcome, the drop path would only repeat this update.
        self.finished = true;
        self.store
            .update_status(self.entry_id, CreationStatus::Failed, None)
            .await
    }
}

impl Drop for CreationGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let entry_id = self.entry_id;
        match Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    match store
                        .update_status(entry_id, CreationStatus::Failed, None)
                        .await
                    {
                        Ok(_) => debug!(%entry_id, "abandoned creation entry marked failed"),
                        Err(e) => warn!(%entry_id, error = %e, "failed to mark abandoned entry"),
                    }
                });
            }
            Err(_) => {
                warn!(%entry_id, "no runtime to mark abandoned entry; it will expire");
            }
        }
    }
}

impl std::fmt::Debug for CreationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreationGuard")
            .field("entry_id", &self.entry_id)
            .field("finished", &self.finished)
            .finish()
    }
}
