//! Coordinator behaviour against a scripted participant driver

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tc_common::{BranchStatus, BranchType, GlobalStatus, ScheduledTask, Xid, now_millis};
use tc_server::scheduler::run_once;
use tc_server::{
    BeginRequest, BranchDriver, Coordinator, RegisterRequest, RequestHandler, RequestMessage,
    ResultBody, ResultCode, RetryConfig, ServerConfig, ServerError, TransactionErrorCode,
};
use tc_session::{Backend, BranchSession, GlobalSession, SessionError, SessionHolder};
use tc_store::{
    LogEntry, LogOperation, Result as StoreResult, SessionCondition, SessionSnapshot, StoreError,
    TransactionStore,
};
use tc_store_memory::{MemoryLockStore, MemoryLocker, MemoryStore};

/// Answers phase two calls with configurable outcomes and records every call
struct ScriptedDriver {
    commit_outcome: Mutex<BranchStatus>,
    /// Per-branch commit outcomes overriding `commit_outcome`
    commit_overrides: Mutex<HashMap<u64, BranchStatus>>,
    rollback_outcome: Mutex<BranchStatus>,
    calls: Mutex<Vec<(&'static str, u64)>>,
    undo_before: Mutex<Option<u64>>,
}

impl ScriptedDriver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            commit_outcome: Mutex::new(BranchStatus::PhaseTwoCommitted),
            commit_overrides: Mutex::new(HashMap::new()),
            rollback_outcome: Mutex::new(BranchStatus::PhaseTwoRollbacked),
            calls: Mutex::new(Vec::new()),
            undo_before: Mutex::new(None),
        })
    }

    fn set_commit(&self, status: BranchStatus) {
        *self.commit_outcome.lock() = status;
    }

    fn set_commit_for(&self, branch_id: u64, status: BranchStatus) {
        self.commit_overrides.lock().insert(branch_id, status);
    }

    fn set_rollback(&self, status: BranchStatus) {
        *self.rollback_outcome.lock() = status;
    }

    fn calls(&self, kind: &str) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
            .collect()
    }
}

#[async_trait]
impl BranchDriver for ScriptedDriver {
    async fn branch_commit(&self, branch: &BranchSession) -> tc_server::Result<BranchStatus> {
        self.calls.lock().push(("commit", branch.branch_id()));
        let overridden = self.commit_overrides.lock().get(&branch.branch_id()).copied();
        Ok(overridden.unwrap_or(*self.commit_outcome.lock()))
    }

    async fn branch_rollback(&self, branch: &BranchSession) -> tc_server::Result<BranchStatus> {
        self.calls.lock().push(("rollback", branch.branch_id()));
        Ok(*self.rollback_outcome.lock())
    }

    async fn delete_undo_logs(&self, before_ms: u64) -> tc_server::Result<()> {
        *self.undo_before.lock() = Some(before_ms);
        Ok(())
    }
}

/// Memory session log that fails chosen operations until healed
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: Mutex<HashSet<LogOperation>>,
}

impl FlakyStore {
    fn fail(&self, op: LogOperation) {
        self.failing.lock().insert(op);
    }

    fn heal(&self) {
        self.failing.lock().clear();
    }
}

impl TransactionStore for FlakyStore {
    fn write(&self, entry: &LogEntry) -> StoreResult<()> {
        if self.failing.lock().contains(&entry.op) {
            return Err(StoreError::Backend("transient".to_string()));
        }
        self.inner.write(entry)
    }

    fn read(&self, xid: &Xid, with_branches: bool) -> StoreResult<Option<SessionSnapshot>> {
        self.inner.read(xid, with_branches)
    }

    fn read_by_condition(&self, condition: &SessionCondition) -> StoreResult<Vec<SessionSnapshot>> {
        self.inner.read_by_condition(condition)
    }
}

fn config() -> ServerConfig {
    ServerConfig::default().with_node("10.0.0.1", 8091, 1)
}

fn coordinator_over(backend: Backend, driver: Arc<ScriptedDriver>, config: &ServerConfig) -> Coordinator {
    let holder = Arc::new(SessionHolder::with_backend(backend, 60_000));
    Coordinator::new(holder, driver, config)
}

fn setup() -> (Coordinator, Arc<ScriptedDriver>) {
    let driver = ScriptedDriver::new();
    (coordinator_over(Backend::memory(), driver.clone(), &config()), driver)
}

fn flaky_setup(config: &ServerConfig) -> (Coordinator, Arc<ScriptedDriver>, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::default());
    let backend = Backend::new(
        store.clone(),
        Arc::new(MemoryLockStore::new()),
        Arc::new(MemoryLocker::new()),
    );
    let driver = ScriptedDriver::new();
    (coordinator_over(backend, driver.clone(), config), driver, store)
}

fn begin(coordinator: &Coordinator, timeout_ms: u64) -> Xid {
    coordinator
        .begin(BeginRequest {
            application_id: "order-service".to_string(),
            transaction_service_group: "default_tx_group".to_string(),
            transaction_name: "place-order".to_string(),
            timeout_ms,
            application_data: None,
        })
        .unwrap()
}

fn register(
    coordinator: &Coordinator,
    xid: &Xid,
    branch_type: BranchType,
    lock_key: &str,
) -> tc_server::Result<u64> {
    coordinator.branch_register(RegisterRequest {
        xid: xid.clone(),
        branch_type,
        resource_id: "jdbc:orders".to_string(),
        client_id: "order-service:10.0.0.9".to_string(),
        lock_key: lock_key.to_string(),
        application_data: None,
    })
}

fn error_code(result: tc_server::Result<u64>) -> TransactionErrorCode {
    match result {
        Err(e) => e.error_code(),
        Ok(id) => panic!("expected an error, registered branch {id}"),
    }
}

#[tokio::test]
async fn test_async_commit_releases_locks() {
    let (coordinator, driver) = setup();
    let holder = coordinator.holder().clone();

    let xid1 = Xid::parse("10.0.0.1:8091:12345").unwrap();
    let session = GlobalSession::new(xid1.clone(), "order-service", "default_tx_group", "place-order", 60_000);
    holder.begin_global_session(&session).unwrap();

    let branch_id = register(&coordinator, &xid1, BranchType::AT, "order_tbl:pk=7").unwrap();

    // A second transaction cannot take the same row.
    let xid2 = begin(&coordinator, 60_000);
    assert_eq!(
        error_code(register(&coordinator, &xid2, BranchType::AT, "order_tbl:pk=7")),
        TransactionErrorCode::LockKeyConflict
    );
    assert!(!coordinator.lock_query(&xid2, "jdbc:orders", "order_tbl:pk=7").unwrap());

    // All branches are AT, so the commit is deferred and reported as done.
    assert_eq!(coordinator.commit(&xid1).await.unwrap(), GlobalStatus::Committed);
    assert_eq!(coordinator.get_status(&xid1).unwrap(), GlobalStatus::AsyncCommitting);
    assert!(holder.async_committing().find_global_session(&xid1, false).unwrap().is_some());
    assert!(holder.retry_committing().find_global_session(&xid1, false).unwrap().is_none());
    assert!(driver.calls("commit").is_empty());

    // The session no longer takes branches.
    assert_eq!(
        error_code(register(&coordinator, &xid1, BranchType::AT, "order_tbl:pk=8")),
        TransactionErrorCode::GlobalTransactionNotActive
    );

    assert!(run_once(&coordinator, ScheduledTask::AsyncCommitting).await.unwrap());
    assert_eq!(driver.calls("commit"), vec![branch_id]);
    assert_eq!(coordinator.get_status(&xid1).unwrap(), GlobalStatus::Finished);
    assert!(holder.async_committing().all_sessions().unwrap().is_empty());

    assert!(coordinator.lock_query(&xid2, "jdbc:orders", "order_tbl:pk=7").unwrap());
    register(&coordinator, &xid2, BranchType::AT, "order_tbl:pk=7").unwrap();
}

#[tokio::test]
async fn test_sync_commit_falls_back_to_retry() {
    let (coordinator, driver) = setup();
    let holder = coordinator.holder().clone();

    let xid = begin(&coordinator, 60_000);
    let branch_id = register(&coordinator, &xid, BranchType::TCC, "order_tbl:1").unwrap();

    driver.set_commit(BranchStatus::PhaseTwoCommitFailedRetryable);
    assert_eq!(coordinator.commit(&xid).await.unwrap(), GlobalStatus::CommitRetrying);
    assert!(holder.retry_committing().find_global_session(&xid, true).unwrap().is_some());
    assert!(holder.async_committing().find_global_session(&xid, true).unwrap().is_none());

    // Still failing: the sweep leaves it queued.
    assert!(run_once(&coordinator, ScheduledTask::RetryCommitting).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::CommitRetrying);

    driver.set_commit(BranchStatus::PhaseTwoCommitted);
    assert!(run_once(&coordinator, ScheduledTask::RetryCommitting).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);
    assert_eq!(driver.calls("commit"), vec![branch_id, branch_id, branch_id]);

    // A second commit of a finished transaction is harmless.
    assert_eq!(coordinator.commit(&xid).await.unwrap(), GlobalStatus::Finished);
}

#[tokio::test]
async fn test_unretryable_commit_fails_the_transaction() {
    let (coordinator, driver) = setup();

    let xid = begin(&coordinator, 60_000);
    register(&coordinator, &xid, BranchType::XA, "order_tbl:1").unwrap();

    driver.set_commit(BranchStatus::PhaseTwoCommitFailedUnretryable);
    assert_eq!(coordinator.commit(&xid).await.unwrap(), GlobalStatus::CommitFailed);
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);

    let other = begin(&coordinator, 60_000);
    assert!(coordinator.lock_query(&other, "jdbc:orders", "order_tbl:1").unwrap());
}

#[tokio::test]
async fn test_phase_one_failed_branches_are_dropped() {
    let (coordinator, driver) = setup();

    let xid = begin(&coordinator, 60_000);
    let failed = register(&coordinator, &xid, BranchType::TCC, "order_tbl:1").unwrap();
    let done = register(&coordinator, &xid, BranchType::TCC, "order_tbl:2").unwrap();
    coordinator
        .branch_report(&xid, failed, BranchStatus::PhaseOneFailed)
        .unwrap();
    coordinator
        .branch_report(&xid, done, BranchStatus::PhaseOneDone)
        .unwrap();

    assert_eq!(coordinator.commit(&xid).await.unwrap(), GlobalStatus::Committed);
    assert_eq!(driver.calls("commit"), vec![done]);

    let missing = coordinator.branch_report(&xid, 42, BranchStatus::PhaseOneDone);
    assert!(matches!(
        missing.map_err(|e| e.error_code()),
        Err(TransactionErrorCode::GlobalTransactionNotExist)
    ));
}

#[tokio::test]
async fn test_rollback_runs_newest_branch_first() {
    let (coordinator, driver) = setup();

    let xid = begin(&coordinator, 60_000);
    let first = register(&coordinator, &xid, BranchType::AT, "order_tbl:1").unwrap();
    let second = register(&coordinator, &xid, BranchType::AT, "stock_tbl:9").unwrap();

    assert_eq!(coordinator.rollback(&xid).await.unwrap(), GlobalStatus::Rollbacked);
    assert_eq!(driver.calls("rollback"), vec![second, first]);
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);
}

#[tokio::test]
async fn test_rollback_retry_gives_up_after_timeout() {
    let driver = ScriptedDriver::new();
    let config = config().with_retry(RetryConfig {
        max_rollback_retry_timeout_ms: 1,
        ..RetryConfig::default()
    });
    let coordinator = coordinator_over(Backend::memory(), driver.clone(), &config);
    let holder = coordinator.holder().clone();

    let xid = begin(&coordinator, 60_000);
    register(&coordinator, &xid, BranchType::AT, "order_tbl:1").unwrap();

    driver.set_rollback(BranchStatus::PhaseTwoRollbackFailedRetryable);
    assert_eq!(coordinator.rollback(&xid).await.unwrap(), GlobalStatus::RollbackRetrying);
    assert!(holder.retry_rollbacking().find_global_session(&xid, false).unwrap().is_some());
    assert_eq!(driver.calls("rollback").len(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(run_once(&coordinator, ScheduledTask::RetryRollbacking).await.unwrap());

    // Ended without another attempt, and the row is free again.
    assert_eq!(driver.calls("rollback").len(), 1);
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);
    let other = begin(&coordinator, 60_000);
    assert!(coordinator.lock_query(&other, "jdbc:orders", "order_tbl:1").unwrap());
}

#[tokio::test]
async fn test_timeout_check_rolls_back_expired_sessions() {
    let (coordinator, driver) = setup();
    let holder = coordinator.holder().clone();

    let expired = begin(&coordinator, 1);
    let branch_id = register(&coordinator, &expired, BranchType::AT, "order_tbl:1").unwrap();
    let alive = begin(&coordinator, 60_000);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(run_once(&coordinator, ScheduledTask::TxTimeoutCheck).await.unwrap());

    assert_eq!(coordinator.get_status(&expired).unwrap(), GlobalStatus::TimeoutRollbacking);
    assert_eq!(coordinator.get_status(&alive).unwrap(), GlobalStatus::Begin);
    assert!(holder.retry_rollbacking().find_global_session(&expired, false).unwrap().is_some());
    assert_eq!(
        error_code(register(&coordinator, &expired, BranchType::AT, "order_tbl:2")),
        TransactionErrorCode::GlobalTransactionNotActive
    );

    assert!(run_once(&coordinator, ScheduledTask::RetryRollbacking).await.unwrap());
    assert_eq!(driver.calls("rollback"), vec![branch_id]);
    assert_eq!(coordinator.get_status(&expired).unwrap(), GlobalStatus::Finished);
}

#[tokio::test]
async fn test_global_report_ends_saga() {
    let (coordinator, driver) = setup();

    let xid = begin(&coordinator, 60_000);
    register(&coordinator, &xid, BranchType::SAGA, "").unwrap();

    assert_eq!(
        coordinator.global_report(&xid, GlobalStatus::Committed).unwrap(),
        GlobalStatus::Committed
    );
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);
    assert!(driver.calls("commit").is_empty());

    let unknown = Xid::parse("10.0.0.1:8091:999").unwrap();
    assert_eq!(
        coordinator.global_report(&unknown, GlobalStatus::Rollbacked).unwrap(),
        GlobalStatus::Finished
    );
}

#[tokio::test]
async fn test_scheduled_task_skipped_while_another_replica_holds_it() {
    let backend = Backend::memory();
    let driver = ScriptedDriver::new();
    let coordinator = coordinator_over(backend.clone(), driver, &config());
    let other = SessionHolder::with_backend(backend, 60_000);

    assert!(other.try_lock(ScheduledTask::AsyncCommitting).unwrap());
    assert!(!run_once(&coordinator, ScheduledTask::AsyncCommitting).await.unwrap());

    assert!(other.unlock(ScheduledTask::AsyncCommitting).unwrap());
    assert!(run_once(&coordinator, ScheduledTask::AsyncCommitting).await.unwrap());
}

#[tokio::test]
async fn test_undo_log_cleanup_uses_retention() {
    let (coordinator, driver) = setup();

    let before = now_millis();
    assert!(run_once(&coordinator, ScheduledTask::UndologDelete).await.unwrap());

    let seven_days = 7 * 86_400_000;
    let cutoff = *driver.undo_before.lock();
    let cutoff = cutoff.unwrap();
    assert!(cutoff <= before.saturating_sub(seven_days) + 1_000);
    assert!(cutoff >= before.saturating_sub(seven_days));
}

#[tokio::test]
async fn test_batched_requests_answered_in_order() {
    let (coordinator, _driver) = setup();
    let handler = RequestHandler::new(Arc::new(coordinator));
    let unknown = Xid::parse("10.0.0.1:8091:77").unwrap();

    let result = handler
        .handle(RequestMessage::Batched(vec![
            RequestMessage::Heartbeat,
            RequestMessage::GlobalStatus { xid: unknown.clone() },
            RequestMessage::Batched(Vec::new()),
            RequestMessage::GlobalCommit { xid: unknown.clone() },
            RequestMessage::BranchStatusReport {
                xid: unknown.clone(),
                branch_id: 1,
                status: BranchStatus::PhaseOneDone,
            },
            RequestMessage::GlobalLockQuery {
                xid: unknown,
                resource_id: "jdbc:orders".to_string(),
                lock_key: "order_tbl:pk=7".to_string(),
            },
        ]))
        .await;

    let ResultBody::Batched(results) = result.body else {
        panic!("expected a batched result");
    };
    assert_eq!(results.len(), 6);
    assert_eq!(results[0].body, ResultBody::Pong);
    assert_eq!(
        results[1].body,
        ResultBody::GlobalStatus {
            status: GlobalStatus::Finished
        }
    );
    assert_eq!(results[2].code, ResultCode::Failed);
    assert_eq!(results[2].error, Some(TransactionErrorCode::Unknown));
    assert_eq!(
        results[3].body,
        ResultBody::GlobalStatus {
            status: GlobalStatus::Finished
        }
    );
    assert_eq!(
        results[4].error,
        Some(TransactionErrorCode::GlobalTransactionNotExist)
    );
    assert_eq!(results[5].body, ResultBody::Lockable { lockable: true });
}

#[tokio::test]
async fn test_json_requests() {
    let (coordinator, _driver) = setup();
    let handler = RequestHandler::new(Arc::new(coordinator));

    let begin = serde_json::to_vec(&RequestMessage::GlobalBegin {
        application_id: "order-service".to_string(),
        transaction_service_group: "default_tx_group".to_string(),
        transaction_name: "place-order".to_string(),
        timeout_ms: 60_000,
        application_data: None,
    })
    .unwrap();
    let reply: tc_server::ResultMessage =
        serde_json::from_slice(&handler.handle_bytes(&begin).await.unwrap()).unwrap();
    let ResultBody::Begin { xid } = &reply.body else {
        panic!("expected a begin result, got {reply:?}");
    };
    assert_eq!(xid.host(), "10.0.0.1");
    assert_eq!(xid.port(), 8091);

    assert!(matches!(
        handler.handle_bytes(b"not json").await,
        Err(ServerError::Codec(_))
    ));
}

#[tokio::test]
async fn test_interrupted_commit_is_retried() {
    let (coordinator, driver, store) = flaky_setup(&config());
    let holder = coordinator.holder().clone();

    let xid = begin(&coordinator, 60_000);
    let branch_id = register(&coordinator, &xid, BranchType::TCC, "order_tbl:1").unwrap();
    let other = begin(&coordinator, 60_000);

    store.fail(LogOperation::BranchRemove);
    let err = coordinator.commit(&xid).await.unwrap_err();
    assert!(matches!(
        err,
        ServerError::Session(SessionError::WriteFailed { op: LogOperation::BranchRemove, .. })
    ));
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::CommitRetrying);
    assert!(holder.retry_committing().find_global_session(&xid, false).unwrap().is_some());
    assert!(!coordinator.lock_query(&other, "jdbc:orders", "order_tbl:1").unwrap());

    // The sweep keeps it while the store still fails.
    assert!(run_once(&coordinator, ScheduledTask::RetryCommitting).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::CommitRetrying);

    store.heal();
    assert!(run_once(&coordinator, ScheduledTask::RetryCommitting).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);
    assert_eq!(driver.calls("commit"), vec![branch_id, branch_id, branch_id]);
    assert!(coordinator.lock_query(&other, "jdbc:orders", "order_tbl:1").unwrap());
}

#[tokio::test]
async fn test_stranded_commit_is_adopted_by_the_retry_sweep() {
    let (coordinator, driver) = setup();
    let holder = coordinator.holder().clone();

    // A synchronous commit that stopped before handing the session over.
    let xid = Xid::parse("10.0.0.1:8091:777").unwrap();
    let session = GlobalSession::new(xid.clone(), "order-service", "default_tx_group", "place-order", 1);
    holder.begin_global_session(&session).unwrap();
    let branch_id = register(&coordinator, &xid, BranchType::TCC, "order_tbl:1").unwrap();
    session.change_status(GlobalStatus::Committing).unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(run_once(&coordinator, ScheduledTask::RetryCommitting).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);
    assert_eq!(driver.calls("commit"), vec![branch_id]);
}

#[tokio::test]
async fn test_interrupted_rollback_is_retried() {
    let (coordinator, driver, store) = flaky_setup(&config());

    let xid = begin(&coordinator, 60_000);
    let first = register(&coordinator, &xid, BranchType::AT, "order_tbl:1").unwrap();
    let second = register(&coordinator, &xid, BranchType::AT, "stock_tbl:9").unwrap();

    store.fail(LogOperation::BranchRemove);
    let err = coordinator.rollback(&xid).await.unwrap_err();
    assert!(matches!(
        err,
        ServerError::Session(SessionError::WriteFailed { op: LogOperation::BranchRemove, .. })
    ));
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::RollbackRetrying);

    store.heal();
    assert!(run_once(&coordinator, ScheduledTask::RetryRollbacking).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);
    assert_eq!(driver.calls("rollback"), vec![second, second, first]);

    let other = begin(&coordinator, 60_000);
    assert!(coordinator.lock_query(&other, "jdbc:orders", "order_tbl:1;stock_tbl:9").unwrap());
}

#[tokio::test]
async fn test_failed_give_up_is_retried_by_the_sweep() {
    let config = config().with_retry(RetryConfig {
        max_commit_retry_timeout_ms: 1,
        ..RetryConfig::default()
    });
    let (coordinator, driver, store) = flaky_setup(&config);

    let xid = begin(&coordinator, 60_000);
    register(&coordinator, &xid, BranchType::TCC, "order_tbl:1").unwrap();
    driver.set_commit(BranchStatus::PhaseTwoCommitFailedRetryable);
    assert_eq!(coordinator.commit(&xid).await.unwrap(), GlobalStatus::CommitRetrying);

    tokio::time::sleep(Duration::from_millis(10)).await;
    store.fail(LogOperation::GlobalUpdate);
    assert!(run_once(&coordinator, ScheduledTask::RetryCommitting).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::CommitRetrying);

    store.heal();
    assert!(run_once(&coordinator, ScheduledTask::RetryCommitting).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);
    assert_eq!(driver.calls("commit").len(), 1);

    let other = begin(&coordinator, 60_000);
    assert!(coordinator.lock_query(&other, "jdbc:orders", "order_tbl:1").unwrap());
}

#[tokio::test]
async fn test_failed_session_remove_is_finished_by_housekeeping() {
    let (coordinator, _driver, store) = flaky_setup(&config());

    let xid = begin(&coordinator, 60_000);
    register(&coordinator, &xid, BranchType::TCC, "order_tbl:1").unwrap();

    store.fail(LogOperation::GlobalRemove);
    let err = coordinator.commit(&xid).await.unwrap_err();
    assert!(matches!(
        err,
        ServerError::Session(SessionError::WriteFailed { op: LogOperation::GlobalRemove, .. })
    ));
    // The outcome is logged and the rows are free; only the record lingers.
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Committed);
    let other = begin(&coordinator, 60_000);
    assert!(coordinator.lock_query(&other, "jdbc:orders", "order_tbl:1").unwrap());

    store.heal();
    assert!(run_once(&coordinator, ScheduledTask::TxTimeoutCheck).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);
    assert_eq!(coordinator.get_status(&other).unwrap(), GlobalStatus::Begin);
}

#[tokio::test]
async fn test_async_commit_stops_calling_unretryable_branches() {
    let (coordinator, driver) = setup();

    let xid = begin(&coordinator, 60_000);
    let broken = register(&coordinator, &xid, BranchType::AT, "order_tbl:1").unwrap();
    let slow = register(&coordinator, &xid, BranchType::AT, "stock_tbl:9").unwrap();
    assert_eq!(coordinator.commit(&xid).await.unwrap(), GlobalStatus::Committed);

    driver.set_commit_for(broken, BranchStatus::PhaseTwoCommitFailedUnretryable);
    driver.set_commit_for(slow, BranchStatus::PhaseTwoCommitFailedRetryable);
    assert!(run_once(&coordinator, ScheduledTask::AsyncCommitting).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::AsyncCommitting);

    // Only the unretryable branch is left once the other one commits.
    driver.set_commit_for(slow, BranchStatus::PhaseTwoCommitted);
    assert!(run_once(&coordinator, ScheduledTask::AsyncCommitting).await.unwrap());
    assert_eq!(coordinator.get_status(&xid).unwrap(), GlobalStatus::Finished);
    assert_eq!(driver.calls("commit"), vec![broken, slow, slow]);

    assert!(run_once(&coordinator, ScheduledTask::AsyncCommitting).await.unwrap());
    assert_eq!(driver.calls("commit").len(), 3);
    let other = begin(&coordinator, 60_000);
    assert!(coordinator.lock_query(&other, "jdbc:orders", "order_tbl:1").unwrap());
}

/// Commits slowly and records whether a rival replica could take the sweep
/// lock during each call
struct SlowDriver {
    delay: Duration,
    rival: SessionHolder,
    stolen: Mutex<Vec<bool>>,
}

#[async_trait]
impl BranchDriver for SlowDriver {
    async fn branch_commit(&self, _branch: &BranchSession) -> tc_server::Result<BranchStatus> {
        tokio::time::sleep(self.delay).await;
        let stolen = self.rival.try_lock(ScheduledTask::AsyncCommitting)?;
        self.stolen.lock().push(stolen);
        Ok(BranchStatus::PhaseTwoCommitted)
    }

    async fn branch_rollback(&self, _branch: &BranchSession) -> tc_server::Result<BranchStatus> {
        Ok(BranchStatus::PhaseTwoRollbacked)
    }

    async fn delete_undo_logs(&self, _before_ms: u64) -> tc_server::Result<()> {
        Ok(())
    }
}

/// Two async-committed sessions swept by a coordinator with a short lease
async fn slow_sweep(lease_ms: u64, delay: Duration) -> (Arc<SlowDriver>, Vec<GlobalStatus>) {
    let backend = Backend::memory();
    let driver = Arc::new(SlowDriver {
        delay,
        rival: SessionHolder::with_backend(backend.clone(), lease_ms),
        stolen: Mutex::new(Vec::new()),
    });
    let holder = Arc::new(SessionHolder::with_backend(backend, lease_ms));
    let coordinator = Coordinator::new(holder, driver.clone(), &config());

    let mut xids = Vec::new();
    for key in ["order_tbl:1", "order_tbl:2"] {
        let xid = begin(&coordinator, 60_000);
        register(&coordinator, &xid, BranchType::AT, key).unwrap();
        assert_eq!(coordinator.commit(&xid).await.unwrap(), GlobalStatus::Committed);
        xids.push(xid);
    }

    assert!(run_once(&coordinator, ScheduledTask::AsyncCommitting).await.unwrap());
    let statuses = xids
        .iter()
        .map(|xid| coordinator.get_status(xid).unwrap())
        .collect();
    (driver, statuses)
}

#[tokio::test]
async fn test_sweep_renews_its_lease() {
    // Two calls outlast the lease, one does not.
    let (driver, statuses) = slow_sweep(200, Duration::from_millis(150)).await;
    assert_eq!(*driver.stolen.lock(), vec![false, false]);
    assert_eq!(statuses, vec![GlobalStatus::Finished, GlobalStatus::Finished]);
}

#[tokio::test]
async fn test_sweep_stops_once_its_lease_is_taken() {
    let (driver, statuses) = slow_sweep(100, Duration::from_millis(150)).await;
    assert_eq!(*driver.stolen.lock(), vec![true]);
    assert_eq!(statuses, vec![GlobalStatus::Finished, GlobalStatus::AsyncCommitting]);
}
