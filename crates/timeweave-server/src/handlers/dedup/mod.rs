//! Duplicate-request suppression.
//!
//! Rejects timeline requests that repeat earlier or in-flight work before
//! any generation starts, and registers novel requests as IN_PROGRESS so
//! concurrent identical submissions collapse to one.
//!
//! The registered entry is owned through a [`CreationGuard`]: completing it
//! records the persisted result, and dropping it early marks the entry
//! FAILED so the request can be resubmitted. Entry TTL and the periodic
//! purge remain as backstops.

mod guard;
mod suppressor;
mod types;

pub use guard::CreationGuard;
pub use suppressor::DuplicationSuppressor;
pub use types::{
    DuplicateReason, DuplicationCheck, DuplicationConfig, DuplicationError, DuplicationResult,
    DEFAULT_CACHE_TTL, DEFAULT_RECENT_WINDOW, DEFAULT_SIMILARITY_CANDIDATES,
    DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_SIMILARITY_TOLERANCE,
};
