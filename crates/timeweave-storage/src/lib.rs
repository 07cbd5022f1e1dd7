//! timeweave-storage: Storage abstraction layer
//!
//! This crate provides the persistence seams used by duplicate suppression
//! and result persistence:
//! - `FingerprintStore` for creation cache entries
//! - `ResultStore` for merged timeline results
//! - In-memory implementations of both
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              timeweave-storage              │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs - Store traits and entry types   │
//! │  memory.rs - In-memory implementations      │
//! │  error.rs  - StorageError                   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryFingerprintStore, MemoryResultStore};
pub use traits::{
    CreationCacheEntry, CreationStatus, FingerprintStore, InsertOutcome, ResultRef, ResultStore,
    StoredResult,
};
