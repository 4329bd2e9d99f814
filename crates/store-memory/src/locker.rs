//! In-memory scheduled locks

use parking_lot::Mutex;
use std::collections::HashMap;
use tc_common::now_millis;
use tc_store::{DistributedLock, DistributedLocker, Result};

/// In-memory [`DistributedLocker`]; exclusive only within one process
#[derive(Default)]
pub struct MemoryLocker {
    // lock key -> current holder
    locks: Mutex<HashMap<String, DistributedLock>>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DistributedLocker for MemoryLocker {
    fn acquire_lock(&self, lock: &DistributedLock) -> Result<bool> {
        let mut locks = self.locks.lock();
        if let Some(current) = locks.get(&lock.key)
            && current.blocks(lock, now_millis())
        {
            return Ok(false);
        }
        locks.insert(lock.key.clone(), lock.clone());
        Ok(true)
    }

    fn release_lock(&self, lock: &DistributedLock) -> Result<bool> {
        let mut locks = self.locks.lock();
        match locks.get(&lock.key) {
            Some(current) if current.owner != lock.owner => Ok(false),
            Some(_) => {
                locks.remove(&lock.key);
                Ok(true)
            }
            None => Ok(true),
        }
    }
}
