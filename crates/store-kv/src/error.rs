//! Error types for the kv backend

use tc_store::StoreError;
use thiserror::Error;

/// Result type for kv operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl From<Error> for StoreError {
    fn from(e: Error) -> Self {
        match e {
            Error::Encoding(msg) => StoreError::Serialization(msg),
            Error::Io(e) => StoreError::Io(e),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
