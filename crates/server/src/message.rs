//! Request and result messages exchanged with transaction clients

use crate::error::{ServerError, TransactionErrorCode};
use serde::{Deserialize, Serialize};
use tc_common::{BranchStatus, BranchType, GlobalStatus, Xid};

/// Inbound request from a transaction manager or resource manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMessage {
    GlobalBegin {
        application_id: String,
        transaction_service_group: String,
        transaction_name: String,
        timeout_ms: u64,
        application_data: Option<String>,
    },
    BranchRegister {
        xid: Xid,
        branch_type: BranchType,
        resource_id: String,
        client_id: String,
        lock_key: String,
        application_data: Option<String>,
    },
    BranchStatusReport {
        xid: Xid,
        branch_id: u64,
        status: BranchStatus,
    },
    GlobalCommit {
        xid: Xid,
    },
    GlobalRollback {
        xid: Xid,
    },
    GlobalStatus {
        xid: Xid,
    },
    /// Client-decided outcome of a saga transaction
    GlobalReport {
        xid: Xid,
        status: GlobalStatus,
    },
    GlobalLockQuery {
        xid: Xid,
        resource_id: String,
        lock_key: String,
    },
    Heartbeat,
    /// Several requests answered in order by one batched result
    Batched(Vec<RequestMessage>),
}

impl RequestMessage {
    pub fn name(&self) -> &'static str {
        match self {
            RequestMessage::GlobalBegin { .. } => "GlobalBegin",
            RequestMessage::BranchRegister { .. } => "BranchRegister",
            RequestMessage::BranchStatusReport { .. } => "BranchStatusReport",
            RequestMessage::GlobalCommit { .. } => "GlobalCommit",
            RequestMessage::GlobalRollback { .. } => "GlobalRollback",
            RequestMessage::GlobalStatus { .. } => "GlobalStatus",
            RequestMessage::GlobalReport { .. } => "GlobalReport",
            RequestMessage::GlobalLockQuery { .. } => "GlobalLockQuery",
            RequestMessage::Heartbeat => "Heartbeat",
            RequestMessage::Batched(_) => "Batched",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    Failed,
}

/// Payload of a successful result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultBody {
    None,
    Begin { xid: Xid },
    BranchRegister { branch_id: u64 },
    GlobalStatus { status: GlobalStatus },
    Lockable { lockable: bool },
    Pong,
    Batched(Vec<ResultMessage>),
}

/// Outbound answer to one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub code: ResultCode,
    pub error: Option<TransactionErrorCode>,
    pub message: Option<String>,
    pub body: ResultBody,
}

impl ResultMessage {
    pub fn success(body: ResultBody) -> Self {
        Self {
            code: ResultCode::Success,
            error: None,
            message: None,
            body,
        }
    }

    pub fn failure(error: &ServerError) -> Self {
        Self {
            code: ResultCode::Failed,
            error: Some(error.error_code()),
            message: Some(error.to_string()),
            body: ResultBody::None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }
}
