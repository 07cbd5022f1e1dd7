//! timeweave-server: Orchestration handlers and process wiring
//!
//! This crate contains the layer that drives the domain core:
//! - Batch coordinator running work units on a bounded pool
//! - Duplicate-request suppressor over the fingerprint and result stores
//! - Timeline pipeline tying suppression, segmentation and persistence
//! - Background purge of expired creation entries
//! - Configuration and observability setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              timeweave-server               │
//! ├─────────────────────────────────────────────┤
//! │  config.rs      - Configuration management  │
//! │  cleanup.rs     - Expired entry purge       │
//! │  observability/ - Logging and metrics       │
//! │  handlers/      - Request handlers          │
//! │    batch/       - Concurrent batches        │
//! │    dedup/       - Duplicate suppression     │
//! │    pipeline.rs  - End-to-end generation     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cleanup;
pub mod config;
pub mod handlers;
pub mod observability;

// Re-exports for convenience
pub use cleanup::{spawn_cache_cleanup_task, spawn_cache_cleanup_task_with_metrics};
pub use config::{ConfigLoadError, TimeweaveConfig};
pub use handlers::{
    BatchCoordinator, BatchResult, CoordinatorConfig, DuplicationConfig, DuplicationSuppressor,
    GenerationOutcome, PipelineError, TimelinePipeline,
};
