//! Distributed branch locking
//!
//! A branch declares the rows it touches as a lock-key descriptor. Before the
//! branch is registered, every row in the descriptor is acquired atomically in
//! the shared lock table on behalf of the owning xid. Conflicts with another
//! xid are refused immediately (first-committer-wins, no queueing).

mod error;
mod key;
mod manager;

pub use error::{LockError, Result};
pub use key::parse_lock_key;
pub use manager::LockManager;
pub use tc_store::LockAttemptResult as LockResult;
