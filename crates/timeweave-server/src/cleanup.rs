//! Background purge of expired creation cache entries.
//!
//! Expired entries are already invisible to lookups; this task reclaims
//! their memory. It runs on a fixed interval (default: 10 minutes) until
//! the returned token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use timeweave_domain::telemetry::{MetricsCrateSink, MetricsSink};
use timeweave_storage::FingerprintStore;

use crate::observability::names;

/// Default interval between purge runs.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Spawns the purge loop; cancel the returned token to stop it.
///
/// The first purge runs immediately. Purge counts go to the global
/// `metrics` recorder.
pub fn spawn_cache_cleanup_task(
    store: Arc<dyn FingerprintStore>,
    cleanup_interval: Duration,
) -> CancellationToken {
    spawn_cache_cleanup_task_with_metrics(store, cleanup_interval, Arc::new(MetricsCrateSink))
}

/// Like [`spawn_cache_cleanup_task`], reporting purge counts to `metrics`.
pub fn spawn_cache_cleanup_task_with_metrics(
    store: Arc<dyn FingerprintStore>,
    cleanup_interval: Duration,
    metrics: Arc<dyn MetricsSink>,
) -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        run_cleanup_loop(store, metrics, cleanup_interval, cancel_clone).await;
    });

    cancel
}

async fn run_cleanup_loop(
    store: Arc<dyn FingerprintStore>,
    metrics: Arc<dyn MetricsSink>,
    cleanup_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(cleanup_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_secs = cleanup_interval.as_secs(),
        "cache cleanup task started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cache cleanup task shutting down");
                break;
            }
            _ = ticker.tick() => {
                run_cleanup_iteration(store.as_ref(), metrics.as_ref()).await;
            }
        }
    }
}

async fn run_cleanup_iteration(store: &dyn FingerprintStore, metrics: &dyn MetricsSink) {
    match store.purge_expired(Utc::now()).await {
        Ok(0) => debug!("cache cleanup: no expired entries"),
        Ok(purged) => {
            metrics.record(names::CACHE_ENTRIES_PURGED_TOTAL, purged as f64, &[]);
            info!(purged, "cache cleanup iteration completed");
        }
        Err(e) => warn!(error = %e, "cache cleanup failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
    use timeweave_domain::model::TimelineRequest;
    use timeweave_domain::telemetry::InMemoryMetrics;
    use timeweave_domain::RequestFingerprint;
    use timeweave_storage::{CreationCacheEntry, MemoryFingerprintStore};

    /// Inserts an entry that expired an hour ago.
    async fn insert_expired(store: &MemoryFingerprintStore, name: &str) {
        let request = TimelineRequest::new(
            name,
            Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 8, 9, 0, 0, 0).unwrap(),
            "user-1",
        );
        let created: DateTime<Utc> = Utc::now() - ChronoDuration::hours(2);
        let entry = CreationCacheEntry::in_progress(
            RequestFingerprint::of(&request),
            &request,
            ChronoDuration::minutes(60),
            created,
        );
        store.insert_if_absent(entry, created).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_purges_until_cancelled() {
        let store = MemoryFingerprintStore::new_shared();
        insert_expired(&store, "First").await;

        let cancel = spawn_cache_cleanup_task(store.clone(), Duration::from_secs(600));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.is_empty(), "first purge runs immediately");

        insert_expired(&store, "Second").await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(store.is_empty(), "next purge runs one interval later");

        cancel.cancel();
        insert_expired(&store, "Third").await;
        tokio::time::sleep(Duration::from_secs(1200)).await;
        assert_eq!(store.len(), 1, "cancelled task no longer purges");
    }

    #[tokio::test(start_paused = true)]
    async fn test_purged_entries_are_reported_to_the_sink() {
        let store = MemoryFingerprintStore::new_shared();
        insert_expired(&store, "First").await;
        insert_expired(&store, "Second").await;
        let metrics = Arc::new(InMemoryMetrics::new());

        let cancel = spawn_cache_cleanup_task_with_metrics(
            store.clone(),
            Duration::from_secs(600),
            metrics.clone(),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert!(store.is_empty());
        assert_eq!(metrics.count(names::CACHE_ENTRIES_PURGED_TOTAL), 1);
        assert_eq!(metrics.total(names::CACHE_ENTRIES_PURGED_TOTAL), 2.0);
    }

    #[test]
    fn test_default_interval() {
        assert_eq!(DEFAULT_CLEANUP_INTERVAL, Duration::from_secs(600));
    }
}
