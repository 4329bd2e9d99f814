//! Storage contract for the transaction coordinator
//!
//! A backend provides three capabilities:
//! - [`TransactionStore`]: the write-ahead session log (write, read, read by condition)
//! - [`LockStore`]: the row lock table shared by every coordinator replica
//! - [`DistributedLocker`]: named scheduled locks for the periodic tasks
//!
//! Backends live in their own crates (`tc-store-memory`, `tc-store-file`,
//! `tc-store-kv`) and are selected with [`StoreMode`].

mod condition;
mod config;
mod error;
mod lock;
mod record;

#[cfg(feature = "testing")]
pub mod testing;

pub use condition::SessionCondition;
pub use config::{StoreConfig, StoreMode, UnknownStoreMode};
pub use error::{Result, StoreError};
pub use lock::{DistributedLock, DistributedLocker, LockAttemptResult, LockHolder, LockStore, RowLock};
pub use record::{
    BranchRecord, GlobalRecord, LogEntry, LogOperation, SessionRecord, SessionSnapshot,
};

use tc_common::Xid;

/// Trait for session log backends
///
/// `write` must not return `Ok` unless the entry is durable to the degree the
/// backend promises. Semantics per operation:
/// - `GlobalAdd` fails with [`StoreError::AlreadyExists`] if the xid is present
/// - `GlobalUpdate` / `BranchAdd` / `BranchUpdate` fail with
///   [`StoreError::NotFound`] if the owning global (or branch) is absent
/// - `GlobalRemove` drops the global and all its branches; removes are idempotent
pub trait TransactionStore: Send + Sync {
    /// Durably apply one log entry
    fn write(&self, entry: &LogEntry) -> Result<()>;

    /// Read one session, optionally with its branches
    fn read(&self, xid: &Xid, with_branches: bool) -> Result<Option<SessionSnapshot>>;

    /// Read every session matching `condition`, ordered by begin time
    fn read_by_condition(&self, condition: &SessionCondition) -> Result<Vec<SessionSnapshot>>;

    /// Whether concurrent writes for one xid are already serialized by the backend
    fn atomic_per_xid(&self) -> bool {
        false
    }

    /// Flush and release backend resources
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
