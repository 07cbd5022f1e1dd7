//! Request handlers.
//!
//! - `batch`: concurrent execution of a request's work units
//! - `dedup`: duplicate-request suppression and creation entry ownership
//! - `pipeline`: end-to-end generation built from the two

pub mod batch;
pub mod dedup;
pub mod pipeline;

pub use batch::{BatchCoordinator, BatchResult, CoordinatorConfig};
pub use dedup::{CreationGuard, DuplicationCheck, DuplicationConfig, DuplicationSuppressor};
pub use pipeline::{GenerationOutcome, PipelineError, TimelinePipeline};
