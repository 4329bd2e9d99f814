//! Row lock table and scheduled lock contracts

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tc_common::Xid;

/// Separator between the parts of a row key
const ROW_KEY_SEPARATOR: &str = "^^^";

/// One row lock requested by a branch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowLock {
    pub xid: Xid,
    pub transaction_id: u64,
    pub branch_id: u64,
    pub resource_id: String,
    pub table: String,
    pub pk: String,
}

impl RowLock {
    /// Key identifying the locked row in the lock table
    pub fn row_key(&self) -> String {
        [
            self.resource_id.as_str(),
            self.table.as_str(),
            self.pk.as_str(),
        ]
        .join(ROW_KEY_SEPARATOR)
    }

    pub fn holder(&self) -> LockHolder {
        LockHolder {
            xid: self.xid.clone(),
            branch_id: self.branch_id,
        }
    }
}

/// Owner of a row lock entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub xid: Xid,
    pub branch_id: u64,
}

/// Outcome of acquiring (or checking) a set of row locks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttemptResult {
    /// Every row is free or already held by the requesting xid
    Granted,
    /// Rows held by another xid, as `(row key, holder)`
    Conflict { holders: Vec<(String, LockHolder)> },
}

impl LockAttemptResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockAttemptResult::Granted)
    }
}

/// Cluster-shared map from row key to owning transaction
///
/// Implementations must make `acquire` atomic across the whole slice: either
/// every row is granted to the requesting xid or none is.
pub trait LockStore: Send + Sync {
    /// Acquire all rows; rows already held by the same xid are re-entrant
    fn acquire(&self, locks: &[RowLock]) -> Result<LockAttemptResult>;

    /// Check whether all rows could be acquired, without taking them
    fn check(&self, locks: &[RowLock]) -> Result<LockAttemptResult>;

    /// Release the given rows if they are held by their xid and branch
    fn release(&self, locks: &[RowLock]) -> Result<()>;

    /// Release every row held by `xid`, returning how many were released
    fn release_xid(&self, xid: &Xid) -> Result<usize>;

    /// Release every row whose holder is not in `live`, returning how many
    /// were released
    fn release_all_except(&self, live: &HashSet<Xid>) -> Result<usize>;

    /// Current holder of a row key
    fn holder(&self, row_key: &str) -> Result<Option<LockHolder>>;
}

/// A named scheduled lock with an owner token and lease expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedLock {
    pub key: String,
    pub owner: String,
    /// Wall-clock expiry in milliseconds since the epoch
    pub expire_at_ms: u64,
}

impl DistributedLock {
    /// Whether `self` (an existing entry) blocks `request` at `now_ms`
    pub fn blocks(&self, request: &DistributedLock, now_ms: u64) -> bool {
        self.owner != request.owner && self.expire_at_ms > now_ms
    }
}

/// Cluster-wide advisory locks for periodic tasks
///
/// Neither method may block waiting for another holder.
pub trait DistributedLocker: Send + Sync {
    /// Take or renew the lock; false if another owner holds an unexpired lease
    fn acquire_lock(&self, lock: &DistributedLock) -> Result<bool>;

    /// Release the lock; false if it is held by another owner
    fn release_lock(&self, lock: &DistributedLock) -> Result<bool>;
}
