//! Branch sessions

use tc_common::{BranchStatus, BranchType, Xid};
use tc_store::BranchRecord;

/// One participant's branch of a global transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSession {
    record: BranchRecord,
}

impl BranchSession {
    /// A freshly registered branch of `xid`
    pub fn new(
        xid: &Xid,
        branch_id: u64,
        branch_type: BranchType,
        resource_id: impl Into<String>,
        lock_key: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            record: BranchRecord {
                xid: xid.clone(),
                transaction_id: xid.transaction_id(),
                branch_id,
                resource_group_id: None,
                resource_id: resource_id.into(),
                lock_key: lock_key.into(),
                branch_type,
                status: BranchStatus::Registered,
                client_id: client_id.into(),
                application_data: None,
            },
        }
    }

    pub fn with_resource_group_id(mut self, group: impl Into<String>) -> Self {
        self.record.resource_group_id = Some(group.into());
        self
    }

    pub fn with_application_data(mut self, data: Option<String>) -> Self {
        self.record.application_data = data;
        self
    }

    pub fn from_record(record: BranchRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &BranchRecord {
        &self.record
    }

    pub fn xid(&self) -> &Xid {
        &self.record.xid
    }

    pub fn branch_id(&self) -> u64 {
        self.record.branch_id
    }

    pub fn branch_type(&self) -> BranchType {
        self.record.branch_type
    }

    pub fn status(&self) -> BranchStatus {
        self.record.status
    }

    pub fn resource_id(&self) -> &str {
        &self.record.resource_id
    }

    pub fn lock_key(&self) -> &str {
        &self.record.lock_key
    }

    pub fn client_id(&self) -> &str {
        &self.record.client_id
    }

    /// Whether phase two may complete without waiting for the participant
    pub fn can_be_committed_async(&self) -> bool {
        self.record.branch_type.can_async_commit()
    }

    pub(crate) fn set_status(&mut self, status: BranchStatus) {
        self.record.status = status;
    }
}
