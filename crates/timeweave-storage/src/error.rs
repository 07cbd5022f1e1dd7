//! Storage error types.

use thiserror::Error;
use uuid::Uuid;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Creation cache entry not found (never inserted, purged or replaced).
    #[error("creation cache entry not found: {id}")]
    EntryNotFound { id: Uuid },

    /// Persisted timeline result not found.
    #[error("timeline result not found: {id}")]
    ResultNotFound { id: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Serialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError {
            message: err.to_string(),
        }
    }
}
