//! Request dispatch

use crate::coordinator::{BeginRequest, Coordinator, RegisterRequest};
use crate::error::{Result, ServerError};
use crate::message::{RequestMessage, ResultBody, ResultMessage};
use std::sync::Arc;
use tracing::{debug, warn};

/// Answers client requests against one coordinator
#[derive(Clone)]
pub struct RequestHandler {
    coordinator: Arc<Coordinator>,
}

impl RequestHandler {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Handle one request; a batch is answered with one result per entry, in order
    pub async fn handle(&self, request: RequestMessage) -> ResultMessage {
        match request {
            RequestMessage::Batched(requests) => {
                debug!(count = requests.len(), "Handling batched requests");
                let mut results = Vec::with_capacity(requests.len());
                for request in requests {
                    results.push(self.handle_one(request).await);
                }
                ResultMessage::success(ResultBody::Batched(results))
            }
            request => self.handle_one(request).await,
        }
    }

    /// Decode a JSON request and encode its result
    pub async fn handle_bytes(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let request: RequestMessage = serde_json::from_slice(payload)?;
        let result = self.handle(request).await;
        Ok(serde_json::to_vec(&result)?)
    }

    async fn handle_one(&self, request: RequestMessage) -> ResultMessage {
        let name = request.name();
        match self.dispatch(request).await {
            Ok(body) => ResultMessage::success(body),
            Err(e) => {
                warn!(request = name, error = %e, "Request failed");
                ResultMessage::failure(&e)
            }
        }
    }

    async fn dispatch(&self, request: RequestMessage) -> Result<ResultBody> {
        let coordinator = &self.coordinator;
        match request {
            RequestMessage::GlobalBegin {
                application_id,
                transaction_service_group,
                transaction_name,
                timeout_ms,
                application_data,
            } => {
                let xid = coordinator.begin(BeginRequest {
                    application_id,
                    transaction_service_group,
                    transaction_name,
                    timeout_ms,
                    application_data,
                })?;
                Ok(ResultBody::Begin { xid })
            }
            RequestMessage::BranchRegister {
                xid,
                branch_type,
                resource_id,
                client_id,
                lock_key,
                application_data,
            } => {
                let branch_id = coordinator.branch_register(RegisterRequest {
                    xid,
                    branch_type,
                    resource_id,
                    client_id,
                    lock_key,
                    application_data,
                })?;
                Ok(ResultBody::BranchRegister { branch_id })
            }
            RequestMessage::BranchStatusReport {
                xid,
                branch_id,
                status,
            } => {
                coordinator.branch_report(&xid, branch_id, status)?;
                Ok(ResultBody::None)
            }
            RequestMessage::GlobalCommit { xid } => {
                let status = coordinator.commit(&xid).await?;
                Ok(ResultBody::GlobalStatus { status })
            }
            RequestMessage::GlobalRollback { xid } => {
                let status = coordinator.rollback(&xid).await?;
                Ok(ResultBody::GlobalStatus { status })
            }
            RequestMessage::GlobalStatus { xid } => {
                let status = coordinator.get_status(&xid)?;
                Ok(ResultBody::GlobalStatus { status })
            }
            RequestMessage::GlobalReport { xid, status } => {
                let status = coordinator.global_report(&xid, status)?;
                Ok(ResultBody::GlobalStatus { status })
            }
            RequestMessage::GlobalLockQuery {
                xid,
                resource_id,
                lock_key,
            } => {
                let lockable = coordinator.lock_query(&xid, &resource_id, &lock_key)?;
                Ok(ResultBody::Lockable { lockable })
            }
            RequestMessage::Heartbeat => Ok(ResultBody::Pong),
            RequestMessage::Batched(_) => Err(ServerError::InvalidRequest(
                "batched requests cannot be nested".into(),
            )),
        }
    }
}
