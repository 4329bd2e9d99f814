//! Server start, restart recovery and shutdown over the file store

use async_trait::async_trait;
use std::sync::Arc;
use tc_common::{BranchStatus, BranchType, GlobalStatus};
use tc_server::{
    BranchDriver, RequestMessage, ResultBody, ResultMessage, Server, ServerConfig,
};
use tc_session::BranchSession;
use tc_store::{StoreConfig, StoreMode};

struct AlwaysSucceeds;

#[async_trait]
impl BranchDriver for AlwaysSucceeds {
    async fn branch_commit(&self, _branch: &BranchSession) -> tc_server::Result<BranchStatus> {
        Ok(BranchStatus::PhaseTwoCommitted)
    }

    async fn branch_rollback(&self, _branch: &BranchSession) -> tc_server::Result<BranchStatus> {
        Ok(BranchStatus::PhaseTwoRollbacked)
    }

    async fn delete_undo_logs(&self, _before_ms: u64) -> tc_server::Result<()> {
        Ok(())
    }
}

fn body(result: ResultMessage) -> ResultBody {
    assert!(result.is_success(), "request failed: {result:?}");
    result.body
}

#[tokio::test]
async fn test_sessions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::default()
        .with_node("10.0.0.1", 8091, 3)
        .with_store(StoreConfig::new(StoreMode::File, dir.path()));

    let server = Server::start(config.clone(), Arc::new(AlwaysSucceeds)).unwrap();
    let handler = server.handler();

    let ResultBody::Begin { xid } = body(
        handler
            .handle(RequestMessage::GlobalBegin {
                application_id: "order-service".to_string(),
                transaction_service_group: "default_tx_group".to_string(),
                transaction_name: "place-order".to_string(),
                timeout_ms: 600_000,
                application_data: None,
            })
            .await,
    ) else {
        panic!("expected a begin result");
    };
    let register = RequestMessage::BranchRegister {
        xid: xid.clone(),
        branch_type: BranchType::TCC,
        resource_id: "jdbc:orders".to_string(),
        client_id: "order-service:10.0.0.9".to_string(),
        lock_key: "order_tbl:pk=7".to_string(),
        application_data: None,
    };
    assert!(matches!(
        body(handler.handle(register).await),
        ResultBody::BranchRegister { .. }
    ));

    drop(handler);
    server.shutdown().await.unwrap();

    // The restarted coordinator recovers the session and its row lock.
    let server = Server::start(config, Arc::new(AlwaysSucceeds)).unwrap();
    let handler = server.handler();
    assert_eq!(
        body(handler.handle(RequestMessage::GlobalStatus { xid: xid.clone() }).await),
        ResultBody::GlobalStatus {
            status: GlobalStatus::Begin
        }
    );
    let recovered = server
        .coordinator()
        .holder()
        .find_global_session(&xid, true)
        .unwrap()
        .unwrap();
    assert!(recovered.is_active());
    assert_eq!(recovered.branches().len(), 1);

    let other = tc_common::Xid::parse("10.0.0.1:8091:1").unwrap();
    assert_eq!(
        body(
            handler
                .handle(RequestMessage::GlobalLockQuery {
                    xid: other,
                    resource_id: "jdbc:orders".to_string(),
                    lock_key: "order_tbl:pk=7".to_string(),
                })
                .await
        ),
        ResultBody::Lockable { lockable: false }
    );

    assert_eq!(
        body(handler.handle(RequestMessage::GlobalCommit { xid: xid.clone() }).await),
        ResultBody::GlobalStatus {
            status: GlobalStatus::Committed
        }
    );
    assert_eq!(
        body(handler.handle(RequestMessage::GlobalStatus { xid }).await),
        ResultBody::GlobalStatus {
            status: GlobalStatus::Finished
        }
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_config_refuses_to_start() {
    let config = ServerConfig::default().with_node("10.0.0.1", 8091, 4096);
    assert!(matches!(
        Server::start(config, Arc::new(AlwaysSucceeds)),
        Err(tc_server::ServerError::Config(_))
    ));
}
