//! Session log, row locks and scheduled locks over one fjall keyspace

use crate::config::KvConfig;
use crate::encoding::{
    branch_key, decode_value, encode_value, global_key, row_key_from_xid_lock_key, status_key,
    xid_from_status_key, xid_lock_key, xid_prefix,
};
use crate::error::Result;
use fjall::{Batch, Keyspace, Partition, PartitionCreateOptions, PersistMode};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use tc_common::{Xid, now_millis};
use tc_store::{
    BranchRecord, DistributedLock, DistributedLocker, GlobalRecord, LockAttemptResult, LockHolder,
    LockStore, LogEntry, LogOperation, Result as StoreResult, RowLock, SessionCondition,
    SessionRecord, SessionSnapshot, StoreError, TransactionStore,
};
use tracing::debug;

/// Value of index-only entries
const EMPTY: &[u8] = &[];

/// Embedded key-value store
pub struct KvStore {
    keyspace: Keyspace,
    persist_mode: PersistMode,

    global: Partition,
    branch: Partition,
    status: Partition,
    row_lock: Partition,
    xid_lock: Partition,
    scheduled_lock: Partition,

    // Serialize read-check-write sequences per concern
    session_guard: Mutex<()>,
    lock_guard: Mutex<()>,
    scheduled_guard: Mutex<()>,
}

impl KvStore {
    /// Open (or create) a store at `config.data_dir`
    pub fn open(config: KvConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let keyspace = fjall::Config::new(&config.data_dir)
            .cache_size(config.block_cache_size)
            .open()?;

        let open = |name: &str| keyspace.open_partition(name, PartitionCreateOptions::default());
        let global = open("global")?;
        let branch = open("branch")?;
        let status = open("status")?;
        let row_lock = open("row_lock")?;
        let xid_lock = open("xid_lock")?;
        let scheduled_lock = open("scheduled_lock")?;

        debug!(path = %config.data_dir.display(), "Opened kv session store");

        Ok(Self {
            keyspace,
            persist_mode: config.persist_mode,
            global,
            branch,
            status,
            row_lock,
            xid_lock,
            scheduled_lock,
            session_guard: Mutex::new(()),
            lock_guard: Mutex::new(()),
            scheduled_guard: Mutex::new(()),
        })
    }

    /// Open with default settings at `path`
    pub fn open_at_path(path: &Path) -> Result<Self> {
        Self::open(KvConfig::new(path))
    }

    fn commit(&self, batch: Batch) -> Result<()> {
        batch.commit()?;
        self.keyspace.persist(self.persist_mode)?;
        Ok(())
    }

    fn load_global(&self, xid: &Xid) -> Result<Option<GlobalRecord>> {
        match self.global.get(global_key(xid))? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Branches of `xid` in branch id order
    fn load_branches(&self, xid: &Xid) -> Result<Vec<BranchRecord>> {
        let mut branches = Vec::new();
        for item in self.branch.prefix(xid_prefix(xid)) {
            let (_, value) = item?;
            branches.push(decode_value(&value)?);
        }
        Ok(branches)
    }

    fn snapshot(&self, global: GlobalRecord, with_branches: bool) -> Result<SessionSnapshot> {
        let branches = if with_branches {
            self.load_branches(&global.xid)?
        } else {
            Vec::new()
        };
        Ok(SessionSnapshot { global, branches })
    }

    fn write_global(&self, op: LogOperation, global: &GlobalRecord) -> StoreResult<()> {
        let key = global_key(&global.xid);
        let existing = self.load_global(&global.xid)?;
        let mut batch = self.keyspace.batch();

        match op {
            LogOperation::GlobalAdd => {
                if existing.is_some() {
                    return Err(StoreError::AlreadyExists(global.xid.to_string()));
                }
                batch.insert(&self.global, key, encode_value(global)?);
                batch.insert(&self.status, status_key(global.status, &global.xid), EMPTY);
            }
            LogOperation::GlobalUpdate => {
                let old = existing.ok_or_else(|| StoreError::NotFound(global.xid.to_string()))?;
                if old.status != global.status {
                    batch.remove(&self.status, status_key(old.status, &old.xid));
                }
                batch.insert(&self.global, key, encode_value(global)?);
                batch.insert(&self.status, status_key(global.status, &global.xid), EMPTY);
            }
            LogOperation::GlobalRemove => {
                let Some(old) = existing else {
                    return Ok(());
                };
                batch.remove(&self.global, key);
                batch.remove(&self.status, status_key(old.status, &old.xid));
                for item in self.branch.prefix(xid_prefix(&old.xid)) {
                    let (branch, _) = item.map_err(crate::Error::from)?;
                    batch.remove(&self.branch, branch);
                }
            }
            other => {
                return Err(StoreError::Backend(format!(
                    "{other} cannot carry a global record"
                )));
            }
        }

        Ok(self.commit(batch)?)
    }

    fn write_branch(&self, op: LogOperation, branch: &BranchRecord) -> StoreResult<()> {
        let key = branch_key(&branch.xid, branch.branch_id);
        let mut batch = self.keyspace.batch();

        match op {
            LogOperation::BranchAdd | LogOperation::BranchUpdate => {
                if self.load_global(&branch.xid)?.is_none() {
                    return Err(StoreError::NotFound(branch.xid.to_string()));
                }
                if op == LogOperation::BranchUpdate
                    && !self.branch.contains_key(&key).map_err(crate::Error::from)?
                {
                    return Err(StoreError::NotFound(format!(
                        "{}/{}",
                        branch.xid, branch.branch_id
                    )));
                }
                batch.insert(&self.branch, key, encode_value(branch)?);
            }
            LogOperation::BranchRemove => {
                batch.remove(&self.branch, key);
            }
            other => {
                return Err(StoreError::Backend(format!(
                    "{other} cannot carry a branch record"
                )));
            }
        }

        Ok(self.commit(batch)?)
    }

    fn read_holder(&self, row_key: &str) -> Result<Option<LockHolder>> {
        match self.row_lock.get(row_key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    fn conflicts(&self, locks: &[RowLock]) -> Result<Vec<(String, LockHolder)>> {
        let mut conflicts = Vec::new();
        for lock in locks {
            let row_key = lock.row_key();
            if let Some(holder) = self.read_holder(&row_key)?
                && holder.xid != lock.xid
            {
                conflicts.push((row_key, holder));
            }
        }
        conflicts.sort_by(|a, b| a.0.cmp(&b.0));
        conflicts.dedup_by(|a, b| a.0 == b.0);
        Ok(conflicts)
    }
}

impl TransactionStore for KvStore {
    fn write(&self, entry: &LogEntry) -> StoreResult<()> {
        let _guard = self.session_guard.lock();
        match &entry.record {
            SessionRecord::Global(global) => self.write_global(entry.op, global),
            SessionRecord::Branch(branch) => self.write_branch(entry.op, branch),
        }
    }

    fn read(&self, xid: &Xid, with_branches: bool) -> StoreResult<Option<SessionSnapshot>> {
        match self.load_global(xid)? {
            Some(global) => Ok(Some(self.snapshot(global, with_branches)?)),
            None => Ok(None),
        }
    }

    fn read_by_condition(&self, condition: &SessionCondition) -> StoreResult<Vec<SessionSnapshot>> {
        let now = now_millis();

        let candidates: Vec<GlobalRecord> = if let Some(xid) = &condition.xid {
            self.load_global(xid)?.into_iter().collect()
        } else if !condition.statuses.is_empty() {
            let statuses: BTreeSet<_> = condition.statuses.iter().copied().collect();
            let mut records = Vec::new();
            for status in statuses {
                for item in self.status.prefix([status.code()]) {
                    let (key, _) = item.map_err(crate::Error::from)?;
                    let xid = xid_from_status_key(&key)?;
                    // The index may briefly lag a concurrent remove
                    if let Some(global) = self.load_global(&xid)? {
                        records.push(global);
                    }
                }
            }
            records
        } else {
            let mut records = Vec::new();
            for item in self.global.iter() {
                let (_, value) = item.map_err(crate::Error::from)?;
                records.push(decode_value(&value)?);
            }
            records
        };

        let mut matched = Vec::new();
        for global in candidates {
            if condition.matches(&global, now) {
                matched.push(self.snapshot(global, condition.with_branches)?);
            }
        }
        matched.sort_by_key(|s| (s.global.begin_time_ms, s.global.transaction_id));
        Ok(matched)
    }

    fn shutdown(&self) -> StoreResult<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(crate::Error::from)?;
        Ok(())
    }
}

impl LockStore for KvStore {
    fn acquire(&self, locks: &[RowLock]) -> StoreResult<LockAttemptResult> {
        let _guard = self.lock_guard.lock();

        let holders = self.conflicts(locks)?;
        if !holders.is_empty() {
            return Ok(LockAttemptResult::Conflict { holders });
        }

        let mut batch = self.keyspace.batch();
        for lock in locks {
            let row_key = lock.row_key();
            if self.read_holder(&row_key)?.is_some() {
                // Already ours
                continue;
            }
            batch.insert(&self.row_lock, row_key.as_bytes(), encode_value(&lock.holder())?);
            batch.insert(&self.xid_lock, xid_lock_key(&lock.xid, &row_key), EMPTY);
        }
        self.commit(batch)?;
        Ok(LockAttemptResult::Granted)
    }

    fn check(&self, locks: &[RowLock]) -> StoreResult<LockAttemptResult> {
        let _guard = self.lock_guard.lock();
        let holders = self.conflicts(locks)?;
        if holders.is_empty() {
            Ok(LockAttemptResult::Granted)
        } else {
            Ok(LockAttemptResult::Conflict { holders })
        }
    }

    fn release(&self, locks: &[RowLock]) -> StoreResult<()> {
        let _guard = self.lock_guard.lock();
        let mut batch = self.keyspace.batch();
        for lock in locks {
            let row_key = lock.row_key();
            if self
                .read_holder(&row_key)?
                .is_some_and(|holder| holder.xid == lock.xid && holder.branch_id == lock.branch_id)
            {
                batch.remove(&self.row_lock, row_key.as_bytes());
                batch.remove(&self.xid_lock, xid_lock_key(&lock.xid, &row_key));
            }
        }
        Ok(self.commit(batch)?)
    }

    fn release_xid(&self, xid: &Xid) -> StoreResult<usize> {
        let _guard = self.lock_guard.lock();
        let mut batch = self.keyspace.batch();
        let mut released = 0;
        for item in self.xid_lock.prefix(xid_prefix(xid)) {
            let (key, _) = item.map_err(crate::Error::from)?;
            let row_key = row_key_from_xid_lock_key(xid, &key)?;
            if self
                .read_holder(&row_key)?
                .is_some_and(|holder| &holder.xid == xid)
            {
                batch.remove(&self.row_lock, row_key.as_bytes());
                released += 1;
            }
            batch.remove(&self.xid_lock, key);
        }
        self.commit(batch)?;
        Ok(released)
    }

    fn release_all_except(&self, live: &HashSet<Xid>) -> StoreResult<usize> {
        let _guard = self.lock_guard.lock();
        let mut batch = self.keyspace.batch();
        let mut released = 0;
        for item in self.row_lock.iter() {
            let (key, value) = item.map_err(crate::Error::from)?;
            let holder: LockHolder = decode_value(&value)?;
            if live.contains(&holder.xid) {
                continue;
            }
            let row_key = std::str::from_utf8(&key).map_err(|e| crate::Error::Encoding(e.to_string()))?;
            batch.remove(&self.row_lock, key.clone());
            batch.remove(&self.xid_lock, xid_lock_key(&holder.xid, row_key));
            released += 1;
        }
        self.commit(batch)?;
        if released > 0 {
            debug!(released, "Released row locks of finished transactions");
        }
        Ok(released)
    }

    fn holder(&self, row_key: &str) -> StoreResult<Option<LockHolder>> {
        Ok(self.read_holder(row_key)?)
    }
}

impl DistributedLocker for KvStore {
    fn acquire_lock(&self, lock: &DistributedLock) -> StoreResult<bool> {
        let _guard = self.scheduled_guard.lock();
        if let Some(bytes) = self
            .scheduled_lock
            .get(lock.key.as_bytes())
            .map_err(crate::Error::from)?
        {
            let current: DistributedLock = decode_value(&bytes)?;
            if current.blocks(lock, now_millis()) {
                return Ok(false);
            }
        }

        let mut batch = self.keyspace.batch();
        batch.insert(&self.scheduled_lock, lock.key.as_bytes(), encode_value(lock)?);
        self.commit(batch)?;
        Ok(true)
    }

    fn release_lock(&self, lock: &DistributedLock) -> StoreResult<bool> {
        let _guard = self.scheduled_guard.lock();
        let Some(bytes) = self
            .scheduled_lock
            .get(lock.key.as_bytes())
            .map_err(crate::Error::from)?
        else {
            return Ok(true);
        };

        let current: DistributedLock = decode_value(&bytes)?;
        if current.owner != lock.owner {
            return Ok(false);
        }
        let mut batch = self.keyspace.batch();
        batch.remove(&self.scheduled_lock, lock.key.as_bytes());
        self.commit(batch)?;
        Ok(true)
    }
}
