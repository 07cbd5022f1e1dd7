//! Timeline request, work unit and payload types.
//!
//! This module contains:
//! - The top-level `TimelineRequest` and its validation
//! - `WorkUnit`, one independently schedulable segment of a request
//! - `EventItem` payloads and their merge identity
//! - `CallOutcome`, the classified result of one segment call

mod types;
#[cfg(test)]
mod types_proptest;

pub use types::*;
