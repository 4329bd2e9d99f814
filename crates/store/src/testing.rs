//! Fixtures and a conformance suite shared by the backend crates
//!
//! Every backend runs the same checks from its own tests so that the memory,
//! file and kv stores stay interchangeable.

use crate::{
    BranchRecord, DistributedLock, DistributedLocker, GlobalRecord, LockStore, LogEntry,
    LogOperation, RowLock, SessionCondition, StoreError, TransactionStore,
};
use tc_common::{BranchStatus, BranchType, GlobalStatus, Xid, now_millis};

/// Global record fixture begun now with a 60s timeout
pub fn global_record(xid: &str, status: GlobalStatus) -> GlobalRecord {
    let xid = Xid::parse(xid).expect("fixture xid");
    GlobalRecord {
        transaction_id: xid.transaction_id(),
        xid,
        status,
        application_id: "app".to_string(),
        transaction_service_group: "default_tx_group".to_string(),
        transaction_name: "test".to_string(),
        timeout_ms: 60_000,
        begin_time_ms: now_millis(),
        application_data: None,
    }
}

/// AT branch fixture registered against `global`
pub fn branch_record(global: &GlobalRecord, branch_id: u64, lock_key: &str) -> BranchRecord {
    BranchRecord {
        xid: global.xid.clone(),
        transaction_id: global.transaction_id,
        branch_id,
        resource_group_id: None,
        resource_id: "jdbc:orders".to_string(),
        lock_key: lock_key.to_string(),
        branch_type: BranchType::AT,
        status: BranchStatus::Registered,
        client_id: "client-1".to_string(),
        application_data: None,
    }
}

/// Row lock fixture on `order_tbl`
pub fn row_lock(xid: &str, branch_id: u64, pk: &str) -> RowLock {
    let xid = Xid::parse(xid).expect("fixture xid");
    RowLock {
        transaction_id: xid.transaction_id(),
        xid,
        branch_id,
        resource_id: "jdbc:orders".to_string(),
        table: "order_tbl".to_string(),
        pk: pk.to_string(),
    }
}

/// Add/update/remove semantics of the session log
pub fn check_session_log(store: &dyn TransactionStore) {
    let global = global_record("10.0.0.1:8091:1", GlobalStatus::Begin);
    let xid = global.xid.clone();

    store
        .write(&LogEntry::global(LogOperation::GlobalAdd, global.clone()))
        .unwrap();
    assert!(matches!(
        store.write(&LogEntry::global(LogOperation::GlobalAdd, global.clone())),
        Err(StoreError::AlreadyExists(_))
    ));

    let b1 = branch_record(&global, 11, "order_tbl:1");
    let b2 = branch_record(&global, 12, "order_tbl:2");
    store
        .write(&LogEntry::branch(LogOperation::BranchAdd, b1.clone()))
        .unwrap();
    store
        .write(&LogEntry::branch(LogOperation::BranchAdd, b2.clone()))
        .unwrap();

    let read = store.read(&xid, true).unwrap().unwrap();
    assert_eq!(read.global, global);
    assert_eq!(
        read.branches.iter().map(|b| b.branch_id).collect::<Vec<_>>(),
        vec![11, 12]
    );
    assert!(store.read(&xid, false).unwrap().unwrap().branches.is_empty());

    let mut updated = global.clone();
    updated.status = GlobalStatus::Committing;
    store
        .write(&LogEntry::global(LogOperation::GlobalUpdate, updated))
        .unwrap();
    let mut b1_done = b1.clone();
    b1_done.status = BranchStatus::PhaseTwoCommitted;
    store
        .write(&LogEntry::branch(LogOperation::BranchUpdate, b1_done))
        .unwrap();

    let read = store.read(&xid, true).unwrap().unwrap();
    assert_eq!(read.global.status, GlobalStatus::Committing);
    assert_eq!(read.branches[0].status, BranchStatus::PhaseTwoCommitted);

    store
        .write(&LogEntry::branch(LogOperation::BranchRemove, b1))
        .unwrap();
    let read = store.read(&xid, true).unwrap().unwrap();
    assert_eq!(read.branches.len(), 1);

    store
        .write(&LogEntry::global(LogOperation::GlobalRemove, global.clone()))
        .unwrap();
    assert!(store.read(&xid, true).unwrap().is_none());
    // Removing twice is not an error.
    store
        .write(&LogEntry::global(LogOperation::GlobalRemove, global.clone()))
        .unwrap();

    // Writes against a missing session fail.
    assert!(matches!(
        store.write(&LogEntry::global(LogOperation::GlobalUpdate, global.clone())),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.write(&LogEntry::branch(LogOperation::BranchAdd, b2)),
        Err(StoreError::NotFound(_))
    ));
}

/// Status-indexed lookups used to rebuild queue working sets
pub fn check_condition_queries(store: &dyn TransactionStore) {
    for (i, status) in GlobalStatus::ALL.iter().enumerate() {
        let global = global_record(&format!("10.0.0.1:8091:{}", 100 + i), *status);
        store
            .write(&LogEntry::global(LogOperation::GlobalAdd, global.clone()))
            .unwrap();
        store
            .write(&LogEntry::branch(
                LogOperation::BranchAdd,
                branch_record(&global, 1_000 + i as u64, ""),
            ))
            .unwrap();
    }

    let live = store
        .read_by_condition(&SessionCondition::by_statuses(GlobalStatus::LIVE))
        .unwrap();
    assert_eq!(live.len(), GlobalStatus::LIVE.len());
    assert!(live.iter().all(|s| s.branches.len() == 1));

    let rollbacking = store
        .read_by_condition(&SessionCondition::by_statuses([
            GlobalStatus::Rollbacking,
            GlobalStatus::RollbackRetrying,
            GlobalStatus::TimeoutRollbacking,
            GlobalStatus::TimeoutRollbackRetrying,
        ]))
        .unwrap();
    assert_eq!(rollbacking.len(), 4);
    assert!(rollbacking.iter().all(|s| s.global.status.is_rollbacking()));

    let async_committing = store
        .read_by_condition(
            &SessionCondition::by_statuses([GlobalStatus::AsyncCommitting]).without_branches(),
        )
        .unwrap();
    assert_eq!(async_committing.len(), 1);
    assert!(async_committing[0].branches.is_empty());

    let by_xid = store
        .read_by_condition(&SessionCondition::by_xid(
            Xid::parse("10.0.0.1:8091:101").unwrap(),
        ))
        .unwrap();
    assert_eq!(by_xid.len(), 1);
    assert_eq!(by_xid[0].global.status, GlobalStatus::Begin);

    // Nothing has been alive for an hour yet.
    let old = store
        .read_by_condition(
            &SessionCondition::by_statuses(GlobalStatus::LIVE).with_overtime_alive_ms(3_600_000),
        )
        .unwrap();
    assert!(old.is_empty());
}

/// Row lock exclusivity, re-entrancy and release
pub fn check_row_locks(store: &dyn LockStore) {
    let xid1 = "10.0.0.1:8091:1";
    let xid2 = "10.0.0.1:8091:2";

    let a1 = row_lock(xid1, 1, "pk=1");
    let b1 = row_lock(xid1, 1, "pk=2");
    assert!(store.acquire(&[a1.clone(), b1.clone()]).unwrap().is_granted());
    // Re-entrant for the same xid.
    assert!(store.acquire(&[a1.clone()]).unwrap().is_granted());

    // Overlapping request from another xid is refused as a whole.
    let a2 = row_lock(xid2, 2, "pk=1");
    let c2 = row_lock(xid2, 2, "pk=3");
    let result = store.acquire(&[c2.clone(), a2.clone()]).unwrap();
    match result {
        crate::LockAttemptResult::Conflict { holders } => {
            assert_eq!(holders.len(), 1);
            assert_eq!(holders[0].0, a1.row_key());
            assert_eq!(holders[0].1.xid, a1.xid);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(store.holder(&c2.row_key()).unwrap().is_none());
    assert!(!store.check(&[a2.clone()]).unwrap().is_granted());

    // Releasing rows held by someone else is a no-op.
    store.release(&[a2.clone()]).unwrap();
    assert_eq!(store.holder(&a1.row_key()).unwrap().unwrap().xid, a1.xid);

    store.release(&[b1.clone()]).unwrap();
    assert!(store.holder(&b1.row_key()).unwrap().is_none());

    assert_eq!(store.release_xid(&a1.xid).unwrap(), 1);
    assert!(store.check(&[a2.clone()]).unwrap().is_granted());
    assert!(store.acquire(&[a2.clone(), c2]).unwrap().is_granted());

    // Rows of transactions that are no longer live are swept.
    let d3 = row_lock("10.0.0.1:8091:3", 3, "pk=4");
    assert!(store.acquire(&[d3.clone()]).unwrap().is_granted());
    let live: std::collections::HashSet<Xid> = std::iter::once(a2.xid.clone()).collect();
    assert_eq!(store.release_all_except(&live).unwrap(), 1);
    assert!(store.holder(&d3.row_key()).unwrap().is_none());
    assert_eq!(store.holder(&a2.row_key()).unwrap().unwrap().xid, a2.xid);
    assert_eq!(store.release_all_except(&live).unwrap(), 0);
}

/// Scheduled lock ownership and lease expiry
pub fn check_scheduled_locks(locker: &dyn DistributedLocker) {
    let far = now_millis() + 60_000;
    let replica_a = DistributedLock {
        key: "retry-commit".to_string(),
        owner: "replica-a".to_string(),
        expire_at_ms: far,
    };
    let replica_b = DistributedLock {
        owner: "replica-b".to_string(),
        ..replica_a.clone()
    };

    assert!(locker.acquire_lock(&replica_a).unwrap());
    assert!(!locker.acquire_lock(&replica_b).unwrap());
    // The owner may renew.
    assert!(locker.acquire_lock(&replica_a).unwrap());
    // Only the owner may release.
    assert!(!locker.release_lock(&replica_b).unwrap());
    assert!(locker.release_lock(&replica_a).unwrap());
    assert!(locker.acquire_lock(&replica_b).unwrap());

    // An expired lease is taken over.
    let stale = DistributedLock {
        key: "timeout-check".to_string(),
        owner: "replica-a".to_string(),
        expire_at_ms: now_millis().saturating_sub(1),
    };
    assert!(locker.acquire_lock(&stale).unwrap());
    let takeover = DistributedLock {
        owner: "replica-b".to_string(),
        expire_at_ms: far,
        ..stale
    };
    assert!(locker.acquire_lock(&takeover).unwrap());
}
