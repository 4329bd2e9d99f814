//! Error types for branch locking

use tc_store::StoreError;
use thiserror::Error;

/// Result type for lock operations
pub type Result<T> = std::result::Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    /// Descriptor that does not follow `table:pk1,pk2;table2:pk3`
    #[error("Invalid lock key {lock_key:?}: {reason}")]
    InvalidLockKey {
        lock_key: String,
        reason: &'static str,
    },

    #[error("Lock store error: {0}")]
    Store(#[from] StoreError),
}
