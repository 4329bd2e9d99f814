//! In-memory store implementation
//!
//! Nothing here survives a restart. The memory backend is used for tests and
//! single-node development, and its lock table and scheduled locks back the
//! file store as well.

mod lock;
mod locker;

pub use lock::MemoryLockStore;
pub use locker::MemoryLocker;

use parking_lot::RwLock;
use std::collections::HashMap;
use tc_common::{Xid, now_millis};
use tc_store::{LogEntry, Result, SessionCondition, SessionSnapshot, TransactionStore};

/// In-memory session log
pub struct MemoryStore {
    // xid -> session
    sessions: RwLock<HashMap<Xid, SessionSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionStore for MemoryStore {
    fn write(&self, entry: &LogEntry) -> Result<()> {
        let xid = entry.record.xid();
        let mut sessions = self.sessions.write();
        let current = sessions.get(xid).cloned();
        match SessionSnapshot::apply(current, entry)? {
            Some(next) => {
                sessions.insert(xid.clone(), next);
            }
            None => {
                sessions.remove(xid);
            }
        }
        Ok(())
    }

    fn read(&self, xid: &Xid, with_branches: bool) -> Result<Option<SessionSnapshot>> {
        Ok(self.sessions.read().get(xid).map(|session| {
            let mut session = session.clone();
            if !with_branches {
                session.branches.clear();
            }
            session
        }))
    }

    fn read_by_condition(&self, condition: &SessionCondition) -> Result<Vec<SessionSnapshot>> {
        let now = now_millis();
        let mut matched: Vec<SessionSnapshot> = self
            .sessions
            .read()
            .values()
            .filter(|session| condition.matches(&session.global, now))
            .cloned()
            .map(|mut session| {
                if !condition.with_branches {
                    session.branches.clear();
                }
                session
            })
            .collect();

        matched.sort_by_key(|s| (s.global.begin_time_ms, s.global.transaction_id));
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_store::testing;

    #[test]
    fn test_session_log() {
        testing::check_session_log(&MemoryStore::new());
    }

    #[test]
    fn test_condition_queries() {
        testing::check_condition_queries(&MemoryStore::new());
    }
}
