//! Storage error types.

use careline_core::escalation::StoreError;
use careline_core::ValidationError;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from rusqlite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (e.g., creating directories).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No escalation with this id.
    #[error("Escalation not found: {0}")]
    EscalationNotFound(Uuid),

    /// A stored escalation failed validation.
    #[error("Invalid escalation: {0}")]
    Validation(#[from] ValidationError),

    /// A stored value could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::EscalationNotFound(id) => StoreError::NotFound(id),
            StorageError::Validation(e) => StoreError::Validation(e),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
