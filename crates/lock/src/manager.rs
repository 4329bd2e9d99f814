//! Branch-level locking over a shared lock table

use crate::error::Result;
use crate::key::parse_lock_key;
use std::collections::HashSet;
use std::sync::Arc;
use tc_common::Xid;
use tc_store::{BranchRecord, LockAttemptResult, LockStore, RowLock};
use tracing::debug;

/// Acquires and releases the rows declared by branches
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Row locks declared by a branch
    pub fn collect_row_locks(&self, branch: &BranchRecord) -> Result<Vec<RowLock>> {
        parse_lock_key(
            &branch.xid,
            branch.branch_id,
            &branch.resource_id,
            &branch.lock_key,
        )
    }

    /// Atomically acquire every row declared by `branch`
    ///
    /// Rows already held by the same xid are granted again; if any row is held
    /// by another xid nothing is acquired.
    pub fn acquire_lock(&self, branch: &BranchRecord) -> Result<LockAttemptResult> {
        let locks = self.collect_row_locks(branch)?;
        if locks.is_empty() {
            return Ok(LockAttemptResult::Granted);
        }

        let result = self.store.acquire(&locks)?;
        match &result {
            LockAttemptResult::Granted => {
                debug!(xid = %branch.xid, branch_id = branch.branch_id, rows = locks.len(), "Acquired row locks");
            }
            LockAttemptResult::Conflict { holders } => {
                debug!(
                    xid = %branch.xid,
                    branch_id = branch.branch_id,
                    conflicts = holders.len(),
                    "Row lock conflict"
                );
            }
        }
        Ok(result)
    }

    /// Release the rows declared by one branch
    pub fn release_branch_locks(&self, branch: &BranchRecord) -> Result<()> {
        let locks = self.collect_row_locks(branch)?;
        if !locks.is_empty() {
            self.store.release(&locks)?;
        }
        Ok(())
    }

    /// Release every row held by a global transaction
    pub fn release_global_locks(&self, xid: &Xid) -> Result<usize> {
        let released = self.store.release_xid(xid)?;
        if released > 0 {
            debug!(%xid, released, "Released global row locks");
        }
        Ok(released)
    }

    /// Release every row whose transaction is not in `live`
    pub fn release_all_except(&self, live: &HashSet<Xid>) -> Result<usize> {
        let released = self.store.release_all_except(live)?;
        if released > 0 {
            debug!(released, "Released orphaned row locks");
        }
        Ok(released)
    }

    /// Whether `xid` could take every row in `lock_key` right now
    pub fn is_lockable(&self, xid: &Xid, resource_id: &str, lock_key: &str) -> Result<bool> {
        let locks = parse_lock_key(xid, 0, resource_id, lock_key)?;
        if locks.is_empty() {
            return Ok(true);
        }
        Ok(self.store.check(&locks)?.is_granted())
    }
}
