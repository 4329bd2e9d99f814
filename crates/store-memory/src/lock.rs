//! In-memory row lock table
//!
//! Exclusive row locks keyed by row key. A single mutex guards the table so
//! that acquiring a set of rows is all-or-nothing.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tc_common::Xid;
use tc_store::{LockAttemptResult, LockHolder, LockStore, Result, RowLock};

#[derive(Default)]
struct LockTable {
    /// row key -> holder
    locks: HashMap<String, LockHolder>,
    /// xid -> row keys it holds
    by_xid: HashMap<Xid, HashSet<String>>,
}

impl LockTable {
    fn conflicts(&self, locks: &[RowLock]) -> Vec<(String, LockHolder)> {
        let mut conflicts = Vec::new();
        for lock in locks {
            let row_key = lock.row_key();
            if let Some(holder) = self.locks.get(&row_key)
                // Re-entrant for the same transaction
                && holder.xid != lock.xid
            {
                conflicts.push((row_key, holder.clone()));
            }
        }
        conflicts.sort_by(|a, b| a.0.cmp(&b.0));
        conflicts.dedup_by(|a, b| a.0 == b.0);
        conflicts
    }

    fn grant(&mut self, lock: &RowLock) {
        let row_key = lock.row_key();
        self.by_xid
            .entry(lock.xid.clone())
            .or_default()
            .insert(row_key.clone());
        self.locks.entry(row_key).or_insert_with(|| lock.holder());
    }

    fn release(&mut self, lock: &RowLock) {
        let row_key = lock.row_key();
        if self
            .locks
            .get(&row_key)
            .is_some_and(|h| h.xid == lock.xid && h.branch_id == lock.branch_id)
        {
            self.locks.remove(&row_key);
            if let Some(keys) = self.by_xid.get_mut(&lock.xid) {
                keys.remove(&row_key);
                if keys.is_empty() {
                    self.by_xid.remove(&lock.xid);
                }
            }
        }
    }

    fn release_all(&mut self, xid: &Xid) -> usize {
        let Some(keys) = self.by_xid.remove(xid) else {
            return 0;
        };
        let count = keys.len();
        for key in keys {
            self.locks.remove(&key);
        }
        count
    }

    fn release_all_except(&mut self, live: &HashSet<Xid>) -> usize {
        let orphans: Vec<Xid> = self
            .by_xid
            .keys()
            .filter(|xid| !live.contains(*xid))
            .cloned()
            .collect();
        orphans.iter().map(|xid| self.release_all(xid)).sum()
    }
}

/// In-memory [`LockStore`]
#[derive(Default)]
pub struct MemoryLockStore {
    table: Mutex<LockTable>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row keys currently held by `xid`, sorted
    pub fn locks_held_by(&self, xid: &Xid) -> Vec<String> {
        let table = self.table.lock();
        let mut keys: Vec<String> = table
            .by_xid
            .get(xid)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl LockStore for MemoryLockStore {
    fn acquire(&self, locks: &[RowLock]) -> Result<LockAttemptResult> {
        let mut table = self.table.lock();
        let holders = table.conflicts(locks);
        if !holders.is_empty() {
            return Ok(LockAttemptResult::Conflict { holders });
        }
        for lock in locks {
            table.grant(lock);
        }
        Ok(LockAttemptResult::Granted)
    }

    fn check(&self, locks: &[RowLock]) -> Result<LockAttemptResult> {
        let holders = self.table.lock().conflicts(locks);
        if holders.is_empty() {
            Ok(LockAttemptResult::Granted)
        } else {
            Ok(LockAttemptResult::Conflict { holders })
        }
    }

    fn release(&self, locks: &[RowLock]) -> Result<()> {
        let mut table = self.table.lock();
        for lock in locks {
            table.release(lock);
        }
        Ok(())
    }

    fn release_xid(&self, xid: &Xid) -> Result<usize> {
        Ok(self.table.lock().release_all(xid))
    }

    fn release_all_except(&self, live: &HashSet<Xid>) -> Result<usize> {
        Ok(self.table.lock().release_all_except(live))
    }

    fn holder(&self, row_key: &str) -> Result<Option<LockHolder>> {
        Ok(self.table.lock().locks.get(row_key).cloned())
    }
}
