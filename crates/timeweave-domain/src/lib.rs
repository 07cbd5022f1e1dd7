//! timeweave-domain: Core orchestration logic for timeline generation
//!
//! This crate contains the pieces that do not depend on storage or process
//! wiring:
//! - Request, work unit, event and call outcome types
//! - Time-range segmentation and request fingerprinting
//! - The segment caller and its collaborator traits
//! - Retry/fallback execution with per error-class circuit breakers
//! - Segment payload caching used as a degraded fallback
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               timeweave-domain              │
//! ├─────────────────────────────────────────────┤
//! │  model/        - Requests, units, outcomes  │
//! │  segmentation  - Range splitting            │
//! │  fingerprint   - Request identity hashing   │
//! │  caller        - Deadline-bound calls       │
//! │  resilience/   - Retry, breaker, fallback   │
//! │  cache/        - Segment payload cache      │
//! │  telemetry     - Metrics sink seam          │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod caller;
pub mod error;
pub mod fingerprint;
pub mod model;
pub mod resilience;
pub mod segmentation;
pub mod similarity;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use cache::{CachedFallback, SegmentCache, SegmentCacheConfig};
pub use caller::{ContentGenerator, FallbackSource, SegmentCaller};
pub use error::{DomainError, DomainResult, ErrorKind, ResilienceError};
pub use fingerprint::RequestFingerprint;
pub use telemetry::{MetricsCrateSink, MetricsSink, NoopMetrics};
