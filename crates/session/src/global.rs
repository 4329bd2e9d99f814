//! Global sessions
//!
//! A [`GlobalSession`] is a cheap, clonable handle. Every mutation follows the
//! same sequence: validate against the current state, broadcast the
//! prospective state to the attached listeners (the root session manager
//! writes it to the durable log), then apply it in memory. If the log write
//! fails the session is left unchanged.

use crate::branch::BranchSession;
use crate::error::{Result, SessionError};
use crate::listener::{LifecycleEvent, LifecycleEventKind, ListenerHandle};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tc_common::{BranchStatus, GlobalStatus, Xid, now_millis};
use tc_store::{BranchRecord, GlobalRecord, SessionSnapshot};
use tracing::error;

struct SessionState {
    record: GlobalRecord,
    active: bool,
    branches: Vec<BranchSession>,
    listeners: Vec<ListenerHandle>,
}

struct Inner {
    state: Mutex<SessionState>,
    /// Held for the whole validate/broadcast/apply sequence
    mutation: Mutex<()>,
    listener_failures: AtomicU64,
}

/// A global transaction and its branches
#[derive(Clone)]
pub struct GlobalSession {
    inner: Arc<Inner>,
}

impl GlobalSession {
    /// A new session in `Begin`, not yet logged
    pub fn new(
        xid: Xid,
        application_id: impl Into<String>,
        transaction_service_group: impl Into<String>,
        transaction_name: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        let record = GlobalRecord {
            transaction_id: xid.transaction_id(),
            xid,
            status: GlobalStatus::Begin,
            application_id: application_id.into(),
            transaction_service_group: transaction_service_group.into(),
            transaction_name: transaction_name.into(),
            timeout_ms,
            begin_time_ms: now_millis(),
            application_data: None,
        };
        Self::from_parts(record, Vec::new(), true)
    }

    /// Rebuild a session read from the durable log
    ///
    /// Only sessions still in `Begin` accept new branches, so only those come
    /// back active.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let active = snapshot.global.status == GlobalStatus::Begin;
        let branches = snapshot
            .branches
            .into_iter()
            .map(BranchSession::from_record)
            .collect();
        Self::from_parts(snapshot.global, branches, active)
    }

    fn from_parts(record: GlobalRecord, branches: Vec<BranchSession>, active: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState {
                    record,
                    active,
                    branches,
                    listeners: Vec::new(),
                }),
                mutation: Mutex::new(()),
                listener_failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_application_data(self, data: Option<String>) -> Self {
        self.inner.state.lock().record.application_data = data;
        self
    }

    pub fn xid(&self) -> Xid {
        self.inner.state.lock().record.xid.clone()
    }

    pub fn transaction_id(&self) -> u64 {
        self.inner.state.lock().record.transaction_id
    }

    pub fn status(&self) -> GlobalStatus {
        self.inner.state.lock().record.status
    }

    /// Copy of the persisted part of the session
    pub fn record(&self) -> GlobalRecord {
        self.inner.state.lock().record.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock();
        SessionSnapshot {
            global: state.record.clone(),
            branches: state.branches.iter().map(|b| b.record().clone()).collect(),
        }
    }

    /// Whether the session still accepts branch registrations
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn set_active(&self, active: bool) {
        self.inner.state.lock().active = active;
    }

    pub fn is_timed_out(&self) -> bool {
        self.inner.state.lock().record.is_timed_out(now_millis())
    }

    /// Branches in registration order
    pub fn branches(&self) -> Vec<BranchSession> {
        self.inner.state.lock().branches.clone()
    }

    pub fn branch(&self, branch_id: u64) -> Option<BranchSession> {
        self.inner
            .state
            .lock()
            .branches
            .iter()
            .find(|b| b.branch_id() == branch_id)
            .cloned()
    }

    pub fn has_branches(&self) -> bool {
        !self.inner.state.lock().branches.is_empty()
    }

    /// Whether every branch can finish phase two asynchronously
    pub fn can_be_committed_async(&self) -> bool {
        self.inner
            .state
            .lock()
            .branches
            .iter()
            .all(BranchSession::can_be_committed_async)
    }

    /// Attach a listener; a listener with the same name is replaced in place
    pub fn attach(&self, handle: ListenerHandle) {
        let mut state = self.inner.state.lock();
        match state.listeners.iter_mut().find(|l| l.name() == handle.name()) {
            Some(existing) => *existing = handle,
            None => state.listeners.push(handle),
        }
    }

    /// Detach a listener by name; returns whether it was attached
    pub fn detach(&self, name: &str) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|l| l.name() != name);
        state.listeners.len() != before
    }

    /// Names of attached listeners in delivery order
    pub fn listener_names(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .listeners
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    }

    /// Number of non-authoritative listener failures seen by this session
    pub fn listener_failures(&self) -> u64 {
        self.inner.listener_failures.load(Ordering::Relaxed)
    }

    /// Announce the session; the root manager logs it
    pub fn begin(&self) -> Result<()> {
        let _mutation = self.inner.mutation.lock();
        let record = self.record();
        if record.status != GlobalStatus::Begin {
            return Err(SessionError::InvalidStatus {
                xid: record.xid,
                status: record.status,
                expected: "Begin",
            });
        }
        self.broadcast(LifecycleEventKind::Begin, &record, None)?;
        self.inner.state.lock().active = true;
        Ok(())
    }

    /// Move to `next` through the state machine
    ///
    /// Re-entering the current status is allowed and re-logs the session.
    pub fn change_status(&self, next: GlobalStatus) -> Result<()> {
        let _mutation = self.inner.mutation.lock();
        let mut record = self.record();
        if record.status != next && !record.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                xid: record.xid,
                from: record.status,
                to: next,
            });
        }
        record.status = next;
        self.broadcast(LifecycleEventKind::StatusChange(next), &record, None)?;
        self.inner.state.lock().record.status = next;
        Ok(())
    }

    /// Register a branch; row locks must already be held
    pub fn add_branch(&self, branch: BranchSession) -> Result<()> {
        let _mutation = self.inner.mutation.lock();
        let record = self.record();
        if branch.xid() != &record.xid {
            return Err(SessionError::ForeignBranch {
                xid: record.xid,
                branch_xid: branch.xid().clone(),
            });
        }
        self.broadcast(LifecycleEventKind::AddBranch, &record, Some(branch.record()))?;

        let mut state = self.inner.state.lock();
        match state
            .branches
            .iter_mut()
            .find(|b| b.branch_id() == branch.branch_id())
        {
            Some(existing) => *existing = branch,
            None => state.branches.push(branch),
        }
        Ok(())
    }

    /// Remove a branch; the root manager releases its row locks
    pub fn remove_branch(&self, branch_id: u64) -> Result<()> {
        let _mutation = self.inner.mutation.lock();
        let branch = self.require_branch(branch_id)?;
        let record = self.record();
        self.broadcast(LifecycleEventKind::RemoveBranch, &record, Some(branch.record()))?;
        self.inner
            .state
            .lock()
            .branches
            .retain(|b| b.branch_id() != branch_id);
        Ok(())
    }

    pub fn change_branch_status(&self, branch_id: u64, status: BranchStatus) -> Result<()> {
        let _mutation = self.inner.mutation.lock();
        let mut branch = self.require_branch(branch_id)?;
        branch.set_status(status);
        let record = self.record();
        self.broadcast(
            LifecycleEventKind::BranchStatusChange(status),
            &record,
            Some(branch.record()),
        )?;

        let mut state = self.inner.state.lock();
        if let Some(existing) = state.branches.iter_mut().find(|b| b.branch_id() == branch_id) {
            existing.set_status(status);
        }
        Ok(())
    }

    /// Stop accepting branches
    pub fn close(&self) -> Result<()> {
        let _mutation = self.inner.mutation.lock();
        if !self.is_active() {
            return Ok(());
        }
        let record = self.record();
        self.broadcast(LifecycleEventKind::Close, &record, None)?;
        self.inner.state.lock().active = false;
        Ok(())
    }

    /// Finish a terminal session; the root manager removes it and its locks
    pub fn end(&self) -> Result<()> {
        let _mutation = self.inner.mutation.lock();
        let record = self.record();
        if !record.status.is_terminal() {
            return Err(SessionError::InvalidStatus {
                xid: record.xid,
                status: record.status,
                expected: "a terminal status",
            });
        }
        self.broadcast(LifecycleEventKind::End, &record, None)?;
        self.inner.state.lock().active = false;
        Ok(())
    }

    fn require_branch(&self, branch_id: u64) -> Result<BranchSession> {
        self.branch(branch_id)
            .ok_or_else(|| SessionError::BranchNotFound {
                xid: self.xid(),
                branch_id,
            })
    }

    fn broadcast(
        &self,
        kind: LifecycleEventKind,
        record: &GlobalRecord,
        branch: Option<&BranchRecord>,
    ) -> Result<()> {
        let event = LifecycleEvent {
            kind,
            session: self,
            record,
            branch,
        };

        // Listeners may detach themselves, so deliver to a snapshot.
        let listeners = self.inner.state.lock().listeners.clone();
        for handle in listeners {
            if let Err(e) = handle.listener().on_event(&event) {
                if handle.listener().is_log_authority() {
                    return Err(e);
                }
                self.inner.listener_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    xid = %record.xid,
                    listener = handle.name(),
                    event = ?kind,
                    error = %e,
                    "Session listener failed"
                );
            }
        }
        Ok(())
    }
}

impl fmt::Debug for GlobalSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("GlobalSession")
            .field("xid", &state.record.xid)
            .field("status", &state.record.status)
            .field("active", &state.active)
            .field("branches", &state.branches.len())
            .finish()
    }
}
