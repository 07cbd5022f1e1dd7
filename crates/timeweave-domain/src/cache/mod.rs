//! Segment payload caching with TTL, and a fallback source backed by it.
//!
//! Successful segment payloads are remembered so that a later call for the
//! same topic and range can degrade to the last known answer when the
//! upstream is failing.
//!
//! # Key Design
//!
//! Cache keys are `(topic, sorted scope ids, segment start, segment end)`.
//! The requester is not part of the key: two users asking about the same
//! topic and range share cached payloads.
//!
//! Size and lifetime are bounded by moka alone (capacity and TTL); the cache
//! keeps no side index that could outlive evicted entries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use tracing::debug;

use crate::caller::FallbackSource;
use crate::error::{DomainError, DomainResult};
use crate::model::{normalize_name, EventItem, WorkUnit};
use crate::telemetry::{names, MetricsSink, NoopMetrics};

/// Configuration for the segment payload cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCacheConfig {
    /// Maximum number of cached segments.
    pub max_capacity: u64,
    /// Lifetime of a cached payload.
    pub ttl: Duration,
}

impl Default for SegmentCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl SegmentCacheConfig {
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Identity of a cached segment payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    /// Lowercased, trimmed timeline name.
    pub topic: String,
    pub scope_ids: Vec<i64>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SegmentKey {
    /// Derives the key for a work unit.
    pub fn for_unit(unit: &WorkUnit) -> Self {
        let mut scope_ids = unit.context.scope_ids.clone();
        scope_ids.sort_unstable();
        Self {
            topic: normalize_name(&unit.context.name),
            scope_ids,
            start: unit.start,
            end: unit.end,
        }
    }
}

/// Concurrent TTL cache of segment payloads.
pub struct SegmentCache {
    cache: Cache<SegmentKey, Arc<Vec<EventItem>>>,
    config: SegmentCacheConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for SegmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl SegmentCache {
    /// Creates an empty cache.
    pub fn new(config: SegmentCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.ttl)
            .build();

        Self {
            cache,
            config,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Sets the sink receiving hit/miss counters.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &SegmentCacheConfig {
        &self.config
    }

    /// Stores the payload generated for `unit`.
    pub async fn insert(&self, unit: &WorkUnit, items: Vec<EventItem>) {
        self.cache
            .insert(SegmentKey::for_unit(unit), Arc::new(items))
            .await;
    }

    /// Returns the cached payload for `unit`, if present and not expired.
    pub async fn get(&self, unit: &WorkUnit) -> Option<Arc<Vec<EventItem>>> {
        let result = self.cache.get(&SegmentKey::for_unit(unit)).await;
        let name = if result.is_some() {
            names::FALLBACK_CACHE_HITS_TOTAL
        } else {
            names::FALLBACK_CACHE_MISSES_TOTAL
        };
        self.metrics.record(name, 1.0, &[]);
        result
    }

    /// Approximate number of cached segments.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance (evictions).
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Fallback source answering from the segment cache.
#[derive(Debug, Clone)]
pub struct CachedFallback {
    cache: Arc<SegmentCache>,
}

impl CachedFallback {
    pub fn new(cache: Arc<SegmentCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl FallbackSource for CachedFallback {
    async fn fallback(&self, unit: &WorkUnit) -> DomainResult<Vec<EventItem>> {
        match self.cache.get(unit).await {
            Some(items) => {
                debug!(unit = %unit.id, items = items.len(), "serving cached segment");
                Ok(items.as_ref().clone())
            }
            None => Err(DomainError::other(format!(
                "no cached payload for segment {}",
                unit.id
            ))),
        }
    }
}
