//! Error types for session management

use tc_common::{GlobalStatus, Xid};
use tc_lock::LockError;
use tc_store::{LockHolder, LogOperation, StoreError};
use thiserror::Error;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The durable log did not accept a write; nothing changed in memory
    #[error("Failed to write {op}: {reason}")]
    WriteFailed { op: LogOperation, reason: String },

    #[error("Invalid transition of {xid} from {from} to {to}")]
    InvalidTransition {
        xid: Xid,
        from: GlobalStatus,
        to: GlobalStatus,
    },

    #[error("Session {xid} is {status}, expected {expected}")]
    InvalidStatus {
        xid: Xid,
        status: GlobalStatus,
        expected: &'static str,
    },

    #[error("Row lock conflict for {xid} branch {branch_id}: {} row(s) held elsewhere", .holders.len())]
    LockConflict {
        xid: Xid,
        branch_id: u64,
        holders: Vec<(String, LockHolder)>,
    },

    /// The session no longer accepts branch registrations
    #[error("Global session {0} is not active")]
    NotActive(Xid),

    #[error("Global session not found: {0}")]
    NotFound(Xid),

    #[error("Branch {branch_id} not found in {xid}")]
    BranchNotFound { xid: Xid, branch_id: u64 },

    #[error("Branch of {branch_xid} cannot join {xid}")]
    ForeignBranch { xid: Xid, branch_xid: Xid },

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    pub(crate) fn write_failed(op: LogOperation, err: impl std::fmt::Display) -> Self {
        SessionError::WriteFailed {
            op,
            reason: err.to_string(),
        }
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::LockConflict { .. })
    }
}
