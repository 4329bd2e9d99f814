//! Core coordinator implementation
//!
//! Phase one decisions (begin, register, commit/rollback decision) run inside
//! the per-session critical section of the session holder. Phase two calls to
//! participants run outside it, since they await the driver.

use crate::config::{NodeConfig, RetryConfig, ServerConfig};
use crate::driver::BranchDriver;
use crate::error::Result;
use std::sync::Arc;
use tc_common::{BranchStatus, BranchType, GlobalStatus, IdGenerator, Xid, now_millis};
use tc_session::{BranchSession, GlobalSession, SessionError, SessionHolder};
use tracing::{debug, error, info, warn};

/// Parameters of a global begin
#[derive(Debug, Clone)]
pub struct BeginRequest {
    pub application_id: String,
    pub transaction_service_group: String,
    pub transaction_name: String,
    pub timeout_ms: u64,
    pub application_data: Option<String>,
}

/// Parameters of a branch registration
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub xid: Xid,
    pub branch_type: BranchType,
    pub resource_id: String,
    pub client_id: String,
    pub lock_key: String,
    pub application_data: Option<String>,
}

/// Transaction coordinator
pub struct Coordinator {
    holder: Arc<SessionHolder>,

    /// Participant transport for phase two
    driver: Arc<dyn BranchDriver>,

    /// Transaction and branch id source
    ids: IdGenerator,

    node: NodeConfig,
    retry: RetryConfig,
}

impl Coordinator {
    pub fn new(holder: Arc<SessionHolder>, driver: Arc<dyn BranchDriver>, config: &ServerConfig) -> Self {
        Self {
            holder,
            driver,
            ids: IdGenerator::new(config.node.node_id),
            node: config.node.clone(),
            retry: config.retry.clone(),
        }
    }

    pub fn holder(&self) -> &Arc<SessionHolder> {
        &self.holder
    }

    /// Give up the coordinator, keeping its session holder
    pub fn into_holder(self) -> Arc<SessionHolder> {
        self.holder
    }

    pub fn driver(&self) -> &Arc<dyn BranchDriver> {
        &self.driver
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Begin a new global transaction and return its xid
    pub fn begin(&self, request: BeginRequest) -> Result<Xid> {
        let xid = Xid::new(self.node.host.clone(), self.node.port, self.ids.next_id());
        let session = GlobalSession::new(
            xid.clone(),
            request.application_id,
            request.transaction_service_group,
            request.transaction_name,
            request.timeout_ms,
        )
        .with_application_data(request.application_data);

        self.holder.begin_global_session(&session)?;
        info!(%xid, timeout_ms = request.timeout_ms, "Begin new global transaction");
        Ok(xid)
    }

    /// Register a branch, taking its row locks first
    pub fn branch_register(&self, request: RegisterRequest) -> Result<u64> {
        let session = self.require_session(&request.xid, false)?;
        let branch_id = self.holder.lock_and_execute(&session, |_| {
            // Re-read under the lock so a concurrent commit is observed.
            let session = self.load(&request.xid, true)?;
            if !session.is_active() {
                return Err(SessionError::NotActive(session.xid()));
            }
            let status = session.status();
            if status != GlobalStatus::Begin {
                return Err(SessionError::InvalidStatus {
                    xid: session.xid(),
                    status,
                    expected: "Begin",
                });
            }

            let branch = BranchSession::new(
                &request.xid,
                self.ids.next_id(),
                request.branch_type,
                request.resource_id.clone(),
                request.lock_key.clone(),
                request.client_id.clone(),
            )
            .with_application_data(request.application_data.clone());
            let branch_id = branch.branch_id();

            let root = self.holder.root();
            root.lock_branch(branch.record())?;
            if let Err(e) = session.add_branch(branch.clone()) {
                if let Err(unlock) = root.unlock_branch(branch.record()) {
                    error!(xid = %request.xid, branch_id, error = %unlock, "Failed to release row locks of a rejected branch");
                }
                return Err(e);
            }
            Ok(branch_id)
        })?;

        info!(xid = %request.xid, branch_id, resource_id = %request.resource_id, "Register branch");
        Ok(branch_id)
    }

    /// Record the phase one outcome reported by a participant
    pub fn branch_report(&self, xid: &Xid, branch_id: u64, status: BranchStatus) -> Result<()> {
        let session = self.require_session(xid, false)?;
        self.holder.lock_and_execute(&session, |_| {
            let session = self.load(xid, true)?;
            session.change_branch_status(branch_id, status)
        })?;
        debug!(%xid, branch_id, ?status, "Branch status reported");
        Ok(())
    }

    /// Whether `xid` could take every row of `lock_key` right now
    pub fn lock_query(&self, xid: &Xid, resource_id: &str, lock_key: &str) -> Result<bool> {
        Ok(self.holder.root().is_lockable(xid, resource_id, lock_key)?)
    }

    /// Current status; a session that is gone has finished
    pub fn get_status(&self, xid: &Xid) -> Result<GlobalStatus> {
        Ok(self
            .holder
            .find_global_session(xid, false)?
            .map_or(GlobalStatus::Finished, |session| session.status()))
    }

    /// Apply a status decided by the client itself
    ///
    /// `Committed` and `Rollbacked` reported from `Begin` pass through
    /// `Committing` / `Rollbacking`; a terminal status ends the session.
    pub fn global_report(&self, xid: &Xid, status: GlobalStatus) -> Result<GlobalStatus> {
        let Some(session) = self.holder.find_global_session(xid, false)? else {
            return Ok(GlobalStatus::Finished);
        };
        let reported = self.holder.lock_and_execute(&session, |_| {
            let session = self.load(xid, true)?;
            session.close()?;
            if session.status() == GlobalStatus::Begin {
                match status {
                    GlobalStatus::Committed => session.change_status(GlobalStatus::Committing)?,
                    GlobalStatus::Rollbacked => session.change_status(GlobalStatus::Rollbacking)?,
                    _ => {}
                }
            }
            session.change_status(status)?;
            if status.is_terminal() {
                session.end()?;
            }
            Ok(session.status())
        })?;
        info!(%xid, status = %reported, "Global status reported");
        Ok(reported)
    }

    /// Commit a global transaction
    ///
    /// Async-committable sessions are handed to the async committer and report
    /// `Committed` right away. Others are committed synchronously and fall back
    /// to the retry-commit queue.
    pub async fn commit(&self, xid: &Xid) -> Result<GlobalStatus> {
        let Some(session) = self.holder.find_global_session(xid, false)? else {
            return Ok(GlobalStatus::Finished);
        };
        let decided = self.holder.lock_and_execute(&session, |_| {
            let session = self.load(xid, true)?;
            session.close()?;
            if session.status() != GlobalStatus::Begin {
                return Ok(Decision::Already(session.status()));
            }
            if session.has_branches() && session.can_be_committed_async() {
                self.holder.queue_to_async_committing(&session)?;
                info!(%xid, "Global transaction queued for async commit");
                return Ok(Decision::Queued(GlobalStatus::Committed));
            }
            session.change_status(GlobalStatus::Committing)?;
            Ok(Decision::Run(session))
        })?;

        match decided {
            Decision::Already(status) | Decision::Queued(status) => Ok(status),
            Decision::Run(session) => match self.do_global_commit(&session, false).await {
                Ok(true) => Ok(GlobalStatus::Committed),
                Ok(false) => Ok(session.status()),
                Err(e) => {
                    // Hand the session to the retry-commit sweep
                    if session.status() == GlobalStatus::Committing
                        && let Err(queue) = self.holder.queue_to_retry_commit(&session)
                    {
                        error!(%xid, error = %queue, "Failed to queue an interrupted commit for retry");
                    }
                    Err(e)
                }
            },
        }
    }

    /// Roll back a global transaction, falling back to the retry-rollback queue
    pub async fn rollback(&self, xid: &Xid) -> Result<GlobalStatus> {
        let Some(session) = self.holder.find_global_session(xid, false)? else {
            return Ok(GlobalStatus::Finished);
        };
        let decided = self.holder.lock_and_execute(&session, |_| {
            let session = self.load(xid, true)?;
            session.close()?;
            if session.status() != GlobalStatus::Begin {
                return Ok(Decision::Already(session.status()));
            }
            session.change_status(GlobalStatus::Rollbacking)?;
            Ok(Decision::Run(session))
        })?;

        match decided {
            Decision::Already(status) | Decision::Queued(status) => Ok(status),
            Decision::Run(session) => match self.do_global_rollback(&session, false).await {
                Ok(true) => Ok(GlobalStatus::Rollbacked),
                Ok(false) => Ok(session.status()),
                Err(e) => {
                    if session.status() == GlobalStatus::Rollbacking
                        && let Err(queue) = self.holder.queue_to_retry_rollback(&session)
                    {
                        error!(%xid, error = %queue, "Failed to queue an interrupted rollback for retry");
                    }
                    Err(e)
                }
            },
        }
    }

    /// Drive phase two commit over every branch
    ///
    /// Returns whether the session finished. A session that did not finish is
    /// queued for retry unless `retrying` says it already sits in a queue.
    ///
    /// An async commit carries on past a branch that cannot be retried and
    /// marks it; the session fails once only such branches are left.
    pub async fn do_global_commit(&self, session: &GlobalSession, retrying: bool) -> Result<bool> {
        let xid = session.xid();
        let committed_async = session.can_be_committed_async();

        for branch in session.branches() {
            let branch_id = branch.branch_id();
            match branch.status() {
                BranchStatus::PhaseOneFailed => {
                    session.remove_branch(branch_id)?;
                    continue;
                }
                BranchStatus::PhaseTwoCommitFailedUnretryable => continue,
                _ => {}
            }

            match self.driver.branch_commit(&branch).await {
                Ok(BranchStatus::PhaseTwoCommitted) => {
                    session.remove_branch(branch_id)?;
                }
                Ok(BranchStatus::PhaseTwoCommitFailedUnretryable) => {
                    if committed_async {
                        session.change_branch_status(branch_id, BranchStatus::PhaseTwoCommitFailedUnretryable)?;
                        error!(%xid, branch_id, "Branch commit failed and cannot be retried");
                        continue;
                    }
                    self.end_as(session, GlobalStatus::CommitFailed)?;
                    error!(%xid, branch_id, "Global commit failed, branch cannot be retried");
                    return Ok(false);
                }
                outcome => {
                    match outcome {
                        Ok(status) => info!(%xid, branch_id, ?status, "Branch commit not finished, will retry"),
                        Err(e) => warn!(%xid, branch_id, error = %e, "Branch commit failed, will retry"),
                    }
                    if committed_async {
                        continue;
                    }
                    if !retrying {
                        self.holder.queue_to_retry_commit(session)?;
                    }
                    return Ok(false);
                }
            }
        }

        let remaining = session.branches();
        if !remaining.is_empty() {
            if remaining
                .iter()
                .all(|b| b.status() == BranchStatus::PhaseTwoCommitFailedUnretryable)
            {
                self.end_as(session, GlobalStatus::CommitFailed)?;
                error!(%xid, branches = remaining.len(), "Global commit failed, branches cannot be retried");
            }
            return Ok(false);
        }
        self.end_as(session, GlobalStatus::Committed)?;
        info!(%xid, "Global transaction committed");
        Ok(true)
    }

    /// Drive phase two rollback over every branch, newest first
    pub async fn do_global_rollback(&self, session: &GlobalSession, retrying: bool) -> Result<bool> {
        let xid = session.xid();
        let timeout = session.status().is_timeout();

        for branch in session.branches().into_iter().rev() {
            let branch_id = branch.branch_id();
            if branch.status() == BranchStatus::PhaseOneFailed {
                session.remove_branch(branch_id)?;
                continue;
            }

            match self.driver.branch_rollback(&branch).await {
                Ok(BranchStatus::PhaseTwoRollbacked) => {
                    session.remove_branch(branch_id)?;
                }
                Ok(BranchStatus::PhaseTwoRollbackFailedUnretryable) => {
                    let failed = if timeout {
                        GlobalStatus::TimeoutRollbackFailed
                    } else {
                        GlobalStatus::RollbackFailed
                    };
                    self.end_as(session, failed)?;
                    error!(%xid, branch_id, "Global rollback failed, branch cannot be retried");
                    return Ok(false);
                }
                outcome => {
                    match outcome {
                        Ok(status) => info!(%xid, branch_id, ?status, "Branch rollback not finished, will retry"),
                        Err(e) => warn!(%xid, branch_id, error = %e, "Branch rollback failed, will retry"),
                    }
                    if !retrying {
                        self.holder.queue_to_retry_rollback(session)?;
                    }
                    return Ok(false);
                }
            }
        }

        let done = if timeout {
            GlobalStatus::TimeoutRollbacked
        } else {
            GlobalStatus::Rollbacked
        };
        self.end_as(session, done)?;
        info!(%xid, status = %done, "Global transaction rolled back");
        Ok(true)
    }

    /// Give up on a session whose retries ran out
    pub fn end_as(&self, session: &GlobalSession, status: GlobalStatus) -> Result<()> {
        session.change_status(status)?;
        session.end()?;
        Ok(())
    }

    /// Whether the retry tasks should stop retrying `session`
    pub fn retry_expired(&self, session: &GlobalSession) -> bool {
        let begin = session.record().begin_time_ms;
        let now = now_millis();
        if session.status().is_rollbacking() {
            self.retry.rollback_retry_expired(begin, now)
        } else {
            self.retry.commit_retry_expired(begin, now)
        }
    }

    fn require_session(&self, xid: &Xid, with_branches: bool) -> Result<GlobalSession> {
        Ok(self.load(xid, with_branches)?)
    }

    fn load(&self, xid: &Xid, with_branches: bool) -> tc_session::Result<GlobalSession> {
        self.holder
            .find_global_session(xid, with_branches)?
            .ok_or_else(|| SessionError::NotFound(xid.clone()))
    }
}

/// What the phase one decision left for phase two
enum Decision {
    /// Another request already decided; carries the current status
    Already(GlobalStatus),
    /// Handed to a queue; carries the status reported to the client
    Queued(GlobalStatus),
    Run(GlobalSession),
}
