//! Outbound calls to transaction participants

use crate::error::Result;
use async_trait::async_trait;
use tc_common::BranchStatus;
use tc_session::BranchSession;

/// Phase two delivery to the resource managers owning the branches
///
/// The returned status tells the coordinator what happened:
/// - `PhaseTwoCommitted` / `PhaseTwoRollbacked`: the branch is finished
/// - `PhaseTwoCommitFailedUnretryable` / `PhaseTwoRollbackFailedUnretryable`:
///   the global transaction fails
/// - anything else, or an error: the branch is retried later
#[async_trait]
pub trait BranchDriver: Send + Sync {
    async fn branch_commit(&self, branch: &BranchSession) -> Result<BranchStatus>;

    async fn branch_rollback(&self, branch: &BranchSession) -> Result<BranchStatus>;

    /// Delete undo logs written before `before_ms` on every resource manager
    async fn delete_undo_logs(&self, before_ms: u64) -> Result<()>;
}
