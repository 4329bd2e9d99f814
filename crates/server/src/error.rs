//! Error types for the coordinator server

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tc_session::SessionError;
use tc_store::{StoreError, UnknownStoreMode};
use thiserror::Error;

/// Error code carried by a failed result message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionErrorCode {
    Unknown,
    LockKeyConflict,
    FailedLockGlobalTransaction,
    FailedWriteSession,
    GlobalTransactionNotExist,
    GlobalTransactionNotActive,
    GlobalTransactionStatusInvalid,
    BranchTransactionNotExist,
}

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A participant could not be reached or answered with garbage
    #[error("Branch driver error: {0}")]
    Driver(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ServerError {
    /// Code reported to the client for this error
    pub fn error_code(&self) -> TransactionErrorCode {
        match self {
            ServerError::Session(e) => match e {
                SessionError::NotActive(_) => TransactionErrorCode::GlobalTransactionNotActive,
                SessionError::InvalidStatus { .. } | SessionError::InvalidTransition { .. } => {
                    TransactionErrorCode::GlobalTransactionStatusInvalid
                }
                SessionError::LockConflict { .. } => TransactionErrorCode::LockKeyConflict,
                SessionError::WriteFailed { .. } => TransactionErrorCode::FailedWriteSession,
                SessionError::NotFound(_) => TransactionErrorCode::GlobalTransactionNotExist,
                SessionError::BranchNotFound { .. } => {
                    TransactionErrorCode::BranchTransactionNotExist
                }
                SessionError::Lock(_) => TransactionErrorCode::FailedLockGlobalTransaction,
                _ => TransactionErrorCode::Unknown,
            },
            _ => TransactionErrorCode::Unknown,
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        ServerError::Session(SessionError::Store(e))
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    UnknownStoreMode(#[from] UnknownStoreMode),
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tc_common::{GlobalStatus, Xid};

    #[test]
    fn test_error_codes() {
        let xid = Xid::parse("10.0.0.1:8091:1").unwrap();
        let not_active: ServerError = SessionError::NotActive(xid.clone()).into();
        assert_eq!(
            not_active.error_code(),
            TransactionErrorCode::GlobalTransactionNotActive
        );

        let transition: ServerError = SessionError::InvalidTransition {
            xid: xid.clone(),
            from: GlobalStatus::Committed,
            to: GlobalStatus::Begin,
        }
        .into();
        assert_eq!(
            transition.error_code(),
            TransactionErrorCode::GlobalTransactionStatusInvalid
        );

        let missing: ServerError = SessionError::NotFound(xid).into();
        assert_eq!(
            missing.error_code(),
            TransactionErrorCode::GlobalTransactionNotExist
        );
        assert_eq!(
            ServerError::Driver("unreachable".into()).error_code(),
            TransactionErrorCode::Unknown
        );
    }
}
