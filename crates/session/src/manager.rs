//! Session managers
//!
//! Every manager is a view over the same durable session log. The root view
//! is the log authority: it turns lifecycle events into log writes. The three
//! queue views are projections selected by status. They admit only sessions
//! whose status matches and ignore updates; removing a session through a
//! queue view is an idempotent delete.

use crate::error::{Result, SessionError};
use crate::global::GlobalSession;
use crate::listener::{LifecycleEvent, LifecycleEventKind, ListenerHandle, SessionLifecycleListener};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tc_common::{
    ASYNC_COMMITTING_SESSION_MANAGER_NAME, GlobalStatus, RETRY_COMMITTING_SESSION_MANAGER_NAME,
    RETRY_ROLLBACKING_SESSION_MANAGER_NAME, ROOT_SESSION_MANAGER_NAME, ScheduledTask, Xid,
    now_millis,
};
use tc_lock::{LockManager, LockResult};
use tc_store::{
    BranchRecord, DistributedLock, DistributedLocker, GlobalRecord, LogEntry, LogOperation,
    SessionCondition, TransactionStore,
};
use tracing::debug;

/// Which view a manager presents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerKind {
    Root,
    AsyncCommitting,
    RetryCommitting,
    RetryRollbacking,
}

impl ManagerKind {
    pub fn name(self) -> &'static str {
        match self {
            ManagerKind::Root => ROOT_SESSION_MANAGER_NAME,
            ManagerKind::AsyncCommitting => ASYNC_COMMITTING_SESSION_MANAGER_NAME,
            ManagerKind::RetryCommitting => RETRY_COMMITTING_SESSION_MANAGER_NAME,
            ManagerKind::RetryRollbacking => RETRY_ROLLBACKING_SESSION_MANAGER_NAME,
        }
    }

    /// Statuses making up the view's working set
    pub fn statuses(self) -> &'static [GlobalStatus] {
        match self {
            ManagerKind::Root => &GlobalStatus::LIVE,
            ManagerKind::AsyncCommitting => &[GlobalStatus::AsyncCommitting],
            ManagerKind::RetryCommitting => &[GlobalStatus::CommitRetrying],
            ManagerKind::RetryRollbacking => &[
                GlobalStatus::Rollbacking,
                GlobalStatus::RollbackRetrying,
                GlobalStatus::TimeoutRollbacking,
                GlobalStatus::TimeoutRollbackRetrying,
            ],
        }
    }

    pub fn admits(self, status: GlobalStatus) -> bool {
        self.statuses().contains(&status)
    }
}

/// Scheduled lock settings shared by the managers of one holder
#[derive(Debug, Clone)]
pub(crate) struct LockOwner {
    /// Owner token of this coordinator process
    pub token: String,
    pub lease_ms: u64,
}

/// One view over the durable session log
pub struct SessionManager {
    kind: ManagerKind,
    store: Arc<dyn TransactionStore>,
    locker: Arc<dyn DistributedLocker>,
    locks: LockManager,
    owner: LockOwner,
    /// The root view, for queue views
    root: Option<Arc<SessionManager>>,
    // xid -> critical section of lock_and_execute
    session_locks: DashMap<Xid, Arc<Mutex<()>>>,
}

impl SessionManager {
    pub(crate) fn root(
        store: Arc<dyn TransactionStore>,
        locker: Arc<dyn DistributedLocker>,
        locks: LockManager,
        owner: LockOwner,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind: ManagerKind::Root,
            store,
            locker,
            locks,
            owner,
            root: None,
            session_locks: DashMap::new(),
        })
    }

    pub(crate) fn view(root: &Arc<SessionManager>, kind: ManagerKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            store: root.store.clone(),
            locker: root.locker.clone(),
            locks: root.locks.clone(),
            owner: root.owner.clone(),
            root: Some(root.clone()),
            session_locks: DashMap::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn kind(&self) -> ManagerKind {
        self.kind
    }

    fn is_root(&self) -> bool {
        self.kind == ManagerKind::Root
    }

    /// Listener handle for attaching this manager to a session
    pub fn handle(self: &Arc<Self>) -> ListenerHandle {
        ListenerHandle::new(self.clone())
    }

    fn write(&self, op: LogOperation, entry: LogEntry) -> Result<()> {
        debug!("MANAGER[{}] SESSION[{}] {}", self.name(), entry.record.xid(), op);
        self.store
            .write(&entry)
            .map_err(|e| SessionError::write_failed(op, e))
    }

    fn write_global(&self, op: LogOperation, record: &GlobalRecord) -> Result<()> {
        self.write(op, LogEntry::global(op, record.clone()))
    }

    fn write_branch(&self, op: LogOperation, record: &BranchRecord) -> Result<()> {
        self.write(op, LogEntry::branch(op, record.clone()))
    }

    /// Put a session into this view
    ///
    /// The root view logs the session. A queue view only admits a session
    /// whose status belongs to its working set.
    pub fn add_global_session(self: &Arc<Self>, session: &GlobalSession) -> Result<()> {
        if self.is_root() {
            self.write_global(LogOperation::GlobalAdd, &session.record())?;
        } else {
            let status = session.status();
            if !self.kind.admits(status) {
                return Err(SessionError::InvalidStatus {
                    xid: session.xid(),
                    status,
                    expected: self.name(),
                });
            }
        }
        session.attach(self.handle());
        Ok(())
    }

    /// Log the current status of a session; queue views ignore updates
    pub fn update_global_session_status(&self, record: &GlobalRecord) -> Result<()> {
        if !self.is_root() {
            return Ok(());
        }
        self.write_global(LogOperation::GlobalUpdate, record)
    }

    /// Take a session out of this view
    ///
    /// Removal is idempotent. The root view also releases the session's row
    /// locks.
    pub fn remove_global_session(&self, session: &GlobalSession) -> Result<()> {
        let record = session.record();
        self.remove_record(&record)?;
        session.detach(self.name());
        Ok(())
    }

    fn remove_record(&self, record: &GlobalRecord) -> Result<()> {
        // Rows before the log entry; a removed session must not leave rows
        // behind.
        if self.is_root() {
            self.locks.release_global_locks(&record.xid)?;
        }
        self.write_global(LogOperation::GlobalRemove, record)?;
        if self.is_root() {
            self.session_locks.remove(&record.xid);
        }
        Ok(())
    }

    pub fn add_branch_session(&self, branch: &BranchRecord) -> Result<()> {
        if !self.is_root() {
            return Ok(());
        }
        self.write_branch(LogOperation::BranchAdd, branch)
    }

    pub fn update_branch_session_status(&self, branch: &BranchRecord) -> Result<()> {
        if !self.is_root() {
            return Ok(());
        }
        self.write_branch(LogOperation::BranchUpdate, branch)
    }

    pub fn remove_branch_session(&self, branch: &BranchRecord) -> Result<()> {
        if !self.is_root() {
            return Ok(());
        }
        self.write_branch(LogOperation::BranchRemove, branch)?;
        self.locks.release_branch_locks(branch)?;
        Ok(())
    }

    /// Take every row lock declared by a branch for its xid
    pub fn lock_branch(&self, branch: &BranchRecord) -> Result<()> {
        match self.locks.acquire_lock(branch)? {
            LockResult::Granted => Ok(()),
            LockResult::Conflict { holders } => Err(SessionError::LockConflict {
                xid: branch.xid.clone(),
                branch_id: branch.branch_id,
                holders,
            }),
        }
    }

    /// Release the row locks of a branch that never got registered
    pub fn unlock_branch(&self, branch: &BranchRecord) -> Result<()> {
        Ok(self.locks.release_branch_locks(branch)?)
    }

    /// Release rows held by transactions outside `live`
    pub fn release_orphaned_locks(&self, live: &HashSet<Xid>) -> Result<usize> {
        Ok(self.locks.release_all_except(live)?)
    }

    /// Whether `xid` could lock every row in `lock_key` now
    pub fn is_lockable(&self, xid: &Xid, resource_id: &str, lock_key: &str) -> Result<bool> {
        Ok(self.locks.is_lockable(xid, resource_id, lock_key)?)
    }

    /// Fresh reconstruction of a session in this view
    ///
    /// The returned session has the root view attached (and this view, for a
    /// queue view), so mutations on it are logged.
    pub fn find_global_session(
        self: &Arc<Self>,
        xid: &Xid,
        with_branches: bool,
    ) -> Result<Option<GlobalSession>> {
        let Some(snapshot) = self.store.read(xid, with_branches)? else {
            return Ok(None);
        };
        if !self.is_root() && !self.kind.admits(snapshot.global.status) {
            return Ok(None);
        }
        Ok(Some(self.adopt(GlobalSession::from_snapshot(snapshot))))
    }

    /// Sessions matching `condition` within this view
    pub fn find_global_sessions(
        self: &Arc<Self>,
        condition: &SessionCondition,
    ) -> Result<Vec<GlobalSession>> {
        let mut condition = condition.clone();
        if !self.is_root() {
            condition.statuses = if condition.statuses.is_empty() {
                self.kind.statuses().to_vec()
            } else {
                condition
                    .statuses
                    .into_iter()
                    .filter(|s| self.kind.admits(*s))
                    .collect()
            };
            if condition.statuses.is_empty() {
                return Ok(Vec::new());
            }
        }

        Ok(self
            .store
            .read_by_condition(&condition)?
            .into_iter()
            .map(|snapshot| self.adopt(GlobalSession::from_snapshot(snapshot)))
            .collect())
    }

    /// The view's working set, oldest first
    pub fn all_sessions(self: &Arc<Self>) -> Result<Vec<GlobalSession>> {
        self.find_global_sessions(&SessionCondition::by_statuses(self.kind.statuses()))
    }

    fn adopt(self: &Arc<Self>, session: GlobalSession) -> GlobalSession {
        if let Some(root) = &self.root {
            session.attach(root.handle());
        }
        session.attach(self.handle());
        session
    }

    /// Run `f` in the critical section of one session
    ///
    /// Passes straight through when the backend already serializes writes per
    /// xid; otherwise concurrent callers for the same xid run one at a time.
    pub fn lock_and_execute<T>(
        &self,
        session: &GlobalSession,
        f: impl FnOnce(&GlobalSession) -> Result<T>,
    ) -> Result<T> {
        if self.store.atomic_per_xid() {
            return f(session);
        }
        let lock = self
            .session_locks
            .entry(session.xid())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();
        f(session)
    }

    /// Try to take the cluster-wide lock of a periodic task; never blocks
    pub fn scheduled_lock(&self, task: ScheduledTask) -> Result<bool> {
        let acquired = self.locker.acquire_lock(&self.distributed_lock(task))?;
        if !acquired {
            debug!(task = %task, "Scheduled lock held by another coordinator");
        }
        Ok(acquired)
    }

    /// Release the lock of a periodic task if this process holds it
    pub fn un_scheduled_lock(&self, task: ScheduledTask) -> Result<bool> {
        Ok(self.locker.release_lock(&self.distributed_lock(task))?)
    }

    fn distributed_lock(&self, task: ScheduledTask) -> DistributedLock {
        DistributedLock {
            key: task.lock_name().to_string(),
            owner: self.owner.token.clone(),
            expire_at_ms: now_millis().saturating_add(self.owner.lease_ms),
        }
    }

    /// Flush and release the backend
    pub fn destroy(&self) -> Result<()> {
        if self.is_root() {
            self.store.shutdown()?;
        }
        Ok(())
    }
}

impl SessionLifecycleListener for SessionManager {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn is_log_authority(&self) -> bool {
        self.is_root()
    }

    fn on_event(&self, event: &LifecycleEvent<'_>) -> Result<()> {
        match event.kind {
            LifecycleEventKind::Begin => {
                if self.is_root() {
                    self.write_global(LogOperation::GlobalAdd, event.record)?;
                }
                Ok(())
            }
            LifecycleEventKind::StatusChange(_) => self.update_global_session_status(event.record),
            LifecycleEventKind::AddBranch => match event.branch {
                Some(branch) => self.add_branch_session(branch),
                None => Ok(()),
            },
            LifecycleEventKind::BranchStatusChange(_) => match event.branch {
                Some(branch) => self.update_branch_session_status(branch),
                None => Ok(()),
            },
            LifecycleEventKind::RemoveBranch => match event.branch {
                Some(branch) => self.remove_branch_session(branch),
                None => Ok(()),
            },
            // Closing only stops new registrations; nothing to log.
            LifecycleEventKind::Close => Ok(()),
            LifecycleEventKind::End => {
                self.remove_record(event.record)?;
                event.session.detach(self.name());
                Ok(())
            }
        }
    }
}
