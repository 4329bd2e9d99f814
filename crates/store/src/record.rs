//! Durable session records and log entries

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tc_common::{BranchStatus, BranchType, GlobalStatus, Xid};

/// Persisted state of a global transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRecord {
    pub xid: Xid,
    pub transaction_id: u64,
    pub status: GlobalStatus,
    pub application_id: String,
    pub transaction_service_group: String,
    pub transaction_name: String,
    /// Timeout in milliseconds, measured from `begin_time_ms`
    pub timeout_ms: u64,
    pub begin_time_ms: u64,
    pub application_data: Option<String>,
}

impl GlobalRecord {
    /// Whether the transaction outlived its timeout at `now_ms`
    pub fn is_timed_out(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.begin_time_ms) > self.timeout_ms
    }
}

/// Persisted state of one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub xid: Xid,
    pub transaction_id: u64,
    pub branch_id: u64,
    pub resource_group_id: Option<String>,
    pub resource_id: String,
    /// Row lock descriptor, `table:pk1,pk2;table2:pk3`
    pub lock_key: String,
    pub branch_type: BranchType,
    pub status: BranchStatus,
    pub client_id: String,
    pub application_data: Option<String>,
}

/// A global record together with its branches in registration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub global: GlobalRecord,
    pub branches: Vec<BranchRecord>,
}

impl SessionSnapshot {
    /// Apply a log entry to the current state of one xid
    ///
    /// Returns the new state, `None` meaning the session no longer exists.
    /// Backends that keep whole snapshots per xid share this so that every
    /// backend enforces the same add/update/remove rules.
    pub fn apply(current: Option<SessionSnapshot>, entry: &LogEntry) -> Result<Option<SessionSnapshot>> {
        let xid = entry.record.xid().to_string();
        match (&entry.record, entry.op) {
            (SessionRecord::Global(global), LogOperation::GlobalAdd) => match current {
                Some(_) => Err(StoreError::AlreadyExists(xid)),
                None => Ok(Some(SessionSnapshot {
                    global: global.clone(),
                    branches: Vec::new(),
                })),
            },
            (SessionRecord::Global(global), LogOperation::GlobalUpdate) => {
                let mut session = current.ok_or(StoreError::NotFound(xid))?;
                session.global = global.clone();
                Ok(Some(session))
            }
            (SessionRecord::Global(_), LogOperation::GlobalRemove) => Ok(None),
            (SessionRecord::Branch(branch), LogOperation::BranchAdd) => {
                let mut session = current.ok_or(StoreError::NotFound(xid))?;
                match session
                    .branches
                    .iter_mut()
                    .find(|b| b.branch_id == branch.branch_id)
                {
                    // Re-adding a branch after a lost acknowledgement overwrites it.
                    Some(existing) => *existing = branch.clone(),
                    None => session.branches.push(branch.clone()),
                }
                Ok(Some(session))
            }
            (SessionRecord::Branch(branch), LogOperation::BranchUpdate) => {
                let mut session = current.ok_or_else(|| StoreError::NotFound(xid.clone()))?;
                let existing = session
                    .branches
                    .iter_mut()
                    .find(|b| b.branch_id == branch.branch_id)
                    .ok_or_else(|| StoreError::NotFound(format!("{xid}/{}", branch.branch_id)))?;
                *existing = branch.clone();
                Ok(Some(session))
            }
            (SessionRecord::Branch(branch), LogOperation::BranchRemove) => Ok(current.map(|mut session| {
                session.branches.retain(|b| b.branch_id != branch.branch_id);
                session
            })),
            (record, op) => Err(StoreError::Backend(format!(
                "{op} cannot carry a {} record",
                if matches!(record, SessionRecord::Global(_)) { "global" } else { "branch" }
            ))),
        }
    }
}

/// Kind of durable log write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogOperation {
    GlobalAdd,
    GlobalUpdate,
    GlobalRemove,
    BranchAdd,
    BranchUpdate,
    BranchRemove,
}

impl LogOperation {
    pub fn is_global(self) -> bool {
        matches!(
            self,
            LogOperation::GlobalAdd | LogOperation::GlobalUpdate | LogOperation::GlobalRemove
        )
    }
}

impl fmt::Display for LogOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogOperation::GlobalAdd => "GLOBAL_ADD",
            LogOperation::GlobalUpdate => "GLOBAL_UPDATE",
            LogOperation::GlobalRemove => "GLOBAL_REMOVE",
            LogOperation::BranchAdd => "BRANCH_ADD",
            LogOperation::BranchUpdate => "BRANCH_UPDATE",
            LogOperation::BranchRemove => "BRANCH_REMOVE",
        };
        f.write_str(name)
    }
}

/// Snapshot carried by a log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRecord {
    Global(GlobalRecord),
    Branch(BranchRecord),
}

impl SessionRecord {
    pub fn xid(&self) -> &Xid {
        match self {
            SessionRecord::Global(global) => &global.xid,
            SessionRecord::Branch(branch) => &branch.xid,
        }
    }
}

/// One write-ahead log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub op: LogOperation,
    pub record: SessionRecord,
}

impl LogEntry {
    pub fn global(op: LogOperation, record: GlobalRecord) -> Self {
        Self {
            op,
            record: SessionRecord::Global(record),
        }
    }

    pub fn branch(op: LogOperation, record: BranchRecord) -> Self {
        Self {
            op,
            record: SessionRecord::Branch(record),
        }
    }

    /// The global record of a global operation
    pub fn as_global(&self) -> Option<&GlobalRecord> {
        match &self.record {
            SessionRecord::Global(global) => Some(global),
            SessionRecord::Branch(_) => None,
        }
    }

    /// The branch record of a branch operation
    pub fn as_branch(&self) -> Option<&BranchRecord> {
        match &self.record {
            SessionRecord::Branch(branch) => Some(branch),
            SessionRecord::Global(_) => None,
        }
    }
}
