//! The session holder
//!
//! Owns the four session manager views of one coordinator process and the
//! helpers that move sessions between them.

use crate::backend::{Backend, open_backend};
use crate::error::{Result, SessionError};
use crate::global::GlobalSession;
use crate::manager::{LockOwner, ManagerKind, SessionManager};
use std::collections::HashSet;
use std::sync::Arc;
use tc_common::{GlobalStatus, ScheduledTask, Xid};
use tc_lock::LockManager;
use tc_store::{SessionCondition, StoreConfig};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Registry of the root view and the three queue views
pub struct SessionHolder {
    root: Arc<SessionManager>,
    async_committing: Arc<SessionManager>,
    retry_committing: Arc<SessionManager>,
    retry_rollbacking: Arc<SessionManager>,
}

impl SessionHolder {
    /// Open the configured backend and build the views
    ///
    /// An unusable backend aborts initialization.
    pub fn init(config: &StoreConfig) -> Result<Self> {
        let backend = open_backend(config)?;
        Ok(Self::with_backend(backend, config.lock_lease_ms))
    }

    /// Build the views over an already opened backend
    pub fn with_backend(backend: Backend, lock_lease_ms: u64) -> Self {
        let owner = LockOwner {
            token: Uuid::now_v7().to_string(),
            lease_ms: lock_lease_ms,
        };
        info!(owner = %owner.token, "Session holder initialized");

        let root = SessionManager::root(
            backend.sessions,
            backend.scheduled,
            LockManager::new(backend.locks),
            owner,
        );
        Self {
            async_committing: SessionManager::view(&root, ManagerKind::AsyncCommitting),
            retry_committing: SessionManager::view(&root, ManagerKind::RetryCommitting),
            retry_rollbacking: SessionManager::view(&root, ManagerKind::RetryRollbacking),
            root,
        }
    }

    pub fn root(&self) -> &Arc<SessionManager> {
        &self.root
    }

    pub fn async_committing(&self) -> &Arc<SessionManager> {
        &self.async_committing
    }

    pub fn retry_committing(&self) -> &Arc<SessionManager> {
        &self.retry_committing
    }

    pub fn retry_rollbacking(&self) -> &Arc<SessionManager> {
        &self.retry_rollbacking
    }

    pub fn manager(&self, kind: ManagerKind) -> &Arc<SessionManager> {
        match kind {
            ManagerKind::Root => &self.root,
            ManagerKind::AsyncCommitting => &self.async_committing,
            ManagerKind::RetryCommitting => &self.retry_committing,
            ManagerKind::RetryRollbacking => &self.retry_rollbacking,
        }
    }

    /// Log a new session through the root view
    pub fn begin_global_session(&self, session: &GlobalSession) -> Result<()> {
        session.attach(self.root.handle());
        if let Err(e) = session.begin() {
            session.detach(self.root.name());
            return Err(e);
        }
        Ok(())
    }

    pub fn find_global_session(&self, xid: &Xid, with_branches: bool) -> Result<Option<GlobalSession>> {
        self.root.find_global_session(xid, with_branches)
    }

    pub fn find_global_sessions(&self, condition: &SessionCondition) -> Result<Vec<GlobalSession>> {
        self.root.find_global_sessions(condition)
    }

    pub fn lock_and_execute<T>(
        &self,
        session: &GlobalSession,
        f: impl FnOnce(&GlobalSession) -> Result<T>,
    ) -> Result<T> {
        self.root.lock_and_execute(session, f)
    }

    /// Hand a committed session to the async committer
    pub fn queue_to_async_committing(&self, session: &GlobalSession) -> Result<()> {
        self.enqueue(&self.async_committing, session, GlobalStatus::AsyncCommitting)
    }

    /// Hand a session whose commit did not finish to the commit retrier
    pub fn queue_to_retry_commit(&self, session: &GlobalSession) -> Result<()> {
        self.enqueue(&self.retry_committing, session, GlobalStatus::CommitRetrying)
    }

    /// Hand a session whose rollback did not finish to the rollback retrier
    pub fn queue_to_retry_rollback(&self, session: &GlobalSession) -> Result<()> {
        let status = if session.status().is_timeout() {
            GlobalStatus::TimeoutRollbackRetrying
        } else {
            GlobalStatus::RollbackRetrying
        };
        self.enqueue(&self.retry_rollbacking, session, status)
    }

    /// Mark a timed-out session and route it to the rollback retrier
    pub fn queue_to_timeout_rollback(&self, session: &GlobalSession) -> Result<()> {
        self.enqueue(&self.retry_rollbacking, session, GlobalStatus::TimeoutRollbacking)
    }

    fn enqueue(
        &self,
        view: &Arc<SessionManager>,
        session: &GlobalSession,
        status: GlobalStatus,
    ) -> Result<()> {
        session.attach(view.handle());
        let result = session
            .change_status(status)
            .and_then(|()| view.add_global_session(session));
        if result.is_err() {
            session.detach(view.name());
        }
        result
    }

    /// Evict a session that should not exist in its current status
    pub fn remove_in_error_state(&self, session: &GlobalSession) {
        let xid = session.xid();
        let status = session.status();
        warn!(%xid, %status, "The global session should not be in this status, removing it");
        match self.root.remove_global_session(session) {
            Ok(()) => info!(%xid, %status, "Removed global session"),
            Err(e) => error!(%xid, %status, error = %e, "Failed to remove global session"),
        }
    }

    /// Try to take the cluster-wide lock of a periodic task
    pub fn try_lock(&self, task: ScheduledTask) -> Result<bool> {
        self.root.scheduled_lock(task)
    }

    pub fn unlock(&self, task: ScheduledTask) -> Result<bool> {
        self.root.un_scheduled_lock(task)
    }

    /// Rebuild the working sets and the row lock table after a restart
    ///
    /// Returns the number of live sessions recovered.
    pub fn reload(&self) -> Result<usize> {
        let sessions = self
            .root
            .find_global_sessions(&SessionCondition::by_statuses(GlobalStatus::ALL))?;

        // Rows left behind by sessions that are already gone
        let live: HashSet<Xid> = sessions
            .iter()
            .filter(|s| s.status() != GlobalStatus::UnKnown && !s.status().is_terminal())
            .map(|s| s.xid())
            .collect();
        let orphaned = self.root.release_orphaned_locks(&live)?;
        if orphaned > 0 {
            warn!(orphaned, "Released row locks held by no live session");
        }

        let mut reloaded = 0;
        for session in sessions {
            let status = session.status();
            match status {
                GlobalStatus::UnKnown => {
                    self.remove_in_error_state(&session);
                    continue;
                }
                s if s.is_terminal() => {
                    self.remove_in_error_state(&session);
                    continue;
                }
                GlobalStatus::AsyncCommitting => self.async_committing.add_global_session(&session)?,
                GlobalStatus::Committing => self.queue_to_retry_commit(&session)?,
                GlobalStatus::CommitRetrying => self.retry_committing.add_global_session(&session)?,
                s if s.is_rollbacking() => self.retry_rollbacking.add_global_session(&session)?,
                _ => session.set_active(true),
            }

            for branch in session.branches() {
                match self.root.lock_branch(branch.record()) {
                    Ok(()) => {}
                    Err(SessionError::LockConflict { holders, .. }) => {
                        warn!(
                            xid = %session.xid(),
                            branch_id = branch.branch_id(),
                            conflicts = holders.len(),
                            "Row locks of a recovered branch are held by another session"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            reloaded += 1;
        }

        info!(reloaded, "Reloaded global sessions");
        Ok(reloaded)
    }

    /// Flush the backend and drop the views
    pub fn destroy(self) -> Result<()> {
        self.root.destroy()?;
        info!("Session holder destroyed");
        Ok(())
    }
}
