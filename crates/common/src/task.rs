//! Names of the periodic coordinator tasks and session queues

use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue (view) names, one per session manager
pub const ROOT_SESSION_MANAGER_NAME: &str = "root.data";
pub const ASYNC_COMMITTING_SESSION_MANAGER_NAME: &str = "async.commit.data";
pub const RETRY_COMMITTING_SESSION_MANAGER_NAME: &str = "retry.commit.data";
pub const RETRY_ROLLBACKING_SESSION_MANAGER_NAME: &str = "retry.rollback.data";

/// Periodic tasks guarded by a cluster-wide scheduled lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduledTask {
    RetryRollbacking,
    RetryCommitting,
    AsyncCommitting,
    TxTimeoutCheck,
    UndologDelete,
}

impl ScheduledTask {
    pub const ALL: [ScheduledTask; 5] = [
        ScheduledTask::RetryRollbacking,
        ScheduledTask::RetryCommitting,
        ScheduledTask::AsyncCommitting,
        ScheduledTask::TxTimeoutCheck,
        ScheduledTask::UndologDelete,
    ];

    /// Name under which the lock is stored in the backend
    pub fn lock_name(self) -> &'static str {
        match self {
            ScheduledTask::RetryRollbacking => "retry-rollback",
            ScheduledTask::RetryCommitting => "retry-commit",
            ScheduledTask::AsyncCommitting => "async-commit",
            ScheduledTask::TxTimeoutCheck => "timeout-check",
            ScheduledTask::UndologDelete => "undo-log-cleanup",
        }
    }
}

impl fmt::Display for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lock_name())
    }
}
