//! Error types for store backends

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store backend errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Failed to open store: {0}")]
    Open(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
