//! Shared fixtures for the server integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use timeweave_domain::error::{DomainError, DomainResult};
use timeweave_domain::model::{EventItem, WorkUnit};
use timeweave_domain::resilience::{CircuitBreaker, RetryExecutor};
use timeweave_domain::{CachedFallback, ContentGenerator, SegmentCache, SegmentCaller};
use timeweave_server::{
    BatchCoordinator, DuplicationSuppressor, TimeweaveConfig, TimelinePipeline,
};
use timeweave_storage::{MemoryFingerprintStore, MemoryResultStore};

/// Generator returning one event per unit, with scriptable failures.
#[derive(Default)]
pub struct FlakyGenerator {
    /// Calls left that fail with a network error before succeeding.
    pub transient_failures: AtomicUsize,
    /// When set, every call fails with a server error.
    pub down: AtomicBool,
    pub calls: AtomicUsize,
}

impl FlakyGenerator {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(n: usize) -> Arc<Self> {
        let generator = Self::default();
        generator.transient_failures.store(n, Ordering::SeqCst);
        Arc::new(generator)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for FlakyGenerator {
    async fn generate(&self, unit: &WorkUnit) -> DomainResult<Vec<EventItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(DomainError::Server {
                message: "upstream unavailable".into(),
            });
        }
        let failed_transiently = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed_transiently {
            return Err(DomainError::Network {
                message: "connection reset".into(),
            });
        }

        Ok(vec![EventItem::new(
            format!("{}-opening", unit.id),
            format!("{} begins", unit.context.name),
            unit.start,
        )
        .with_source("flaky-generator")])
    }
}

/// Every component wired the way a process would wire it.
pub struct Harness {
    pub generator: Arc<FlakyGenerator>,
    pub breaker: Arc<CircuitBreaker>,
    pub executor: Arc<RetryExecutor>,
    pub coordinator: Arc<BatchCoordinator>,
    pub fingerprints: Arc<MemoryFingerprintStore>,
    pub results: Arc<MemoryResultStore>,
    pub pipeline: TimelinePipeline,
}

pub fn harness(
    config: &TimeweaveConfig,
    generator: Arc<FlakyGenerator>,
) -> anyhow::Result<Harness> {
    config.validate()?;

    let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker_config()));
    let executor = Arc::new(
        RetryExecutor::new(config.retry_policy()).with_circuit_breaker(Arc::clone(&breaker)),
    );

    let mut caller = SegmentCaller::new(generator.clone()).with_executor(Arc::clone(&executor));
    if let Some(cache_config) = config.fallback_cache_config() {
        let cache = Arc::new(SegmentCache::new(cache_config));
        caller = caller
            .with_cache(Arc::clone(&cache))
            .with_fallback(Arc::new(CachedFallback::new(cache)));
    }

    let coordinator = Arc::new(BatchCoordinator::new(
        Arc::new(caller),
        config.coordinator_config(),
    )?);

    let fingerprints = MemoryFingerprintStore::new_shared();
    let results = MemoryResultStore::new_shared();
    let suppressor = Arc::new(DuplicationSuppressor::new(
        fingerprints.clone(),
        results.clone(),
        config.duplication_config(),
    )?);
    let pipeline = TimelinePipeline::new(suppressor, Arc::clone(&coordinator), results.clone())
        .with_segmentation(config.segmentation_config());

    Ok(Harness {
        generator,
        breaker,
        executor,
        coordinator,
        fingerprints,
        results,
        pipeline,
    })
}

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, d, 0, 0, 0).unwrap()
}
