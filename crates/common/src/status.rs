//! Global and branch transaction status codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a global transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GlobalStatus {
    /// Fallback for codes this coordinator does not recognise
    UnKnown,
    /// Initial state; branches may register
    Begin,
    /// Phase two commit in progress
    Committing,
    /// Commit failed transiently; the retry-commit sweep owns the session
    CommitRetrying,
    /// Phase two rollback in progress
    Rollbacking,
    /// Rollback failed transiently; the retry-rollback sweep owns the session
    RollbackRetrying,
    /// Rollback started by the timeout checker
    TimeoutRollbacking,
    /// Timeout rollback failed transiently
    TimeoutRollbackRetrying,
    /// Commit decided; branches are committed in the background
    AsyncCommitting,
    Committed,
    CommitFailed,
    Rollbacked,
    RollbackFailed,
    TimeoutRollbacked,
    TimeoutRollbackFailed,
    /// Reported finished by the client (saga / tcc modes)
    Finished,
}

impl GlobalStatus {
    /// Statuses of sessions that still need work from the coordinator
    pub const LIVE: [GlobalStatus; 9] = [
        GlobalStatus::UnKnown,
        GlobalStatus::Begin,
        GlobalStatus::Committing,
        GlobalStatus::CommitRetrying,
        GlobalStatus::Rollbacking,
        GlobalStatus::RollbackRetrying,
        GlobalStatus::TimeoutRollbacking,
        GlobalStatus::TimeoutRollbackRetrying,
        GlobalStatus::AsyncCommitting,
    ];

    /// Every status, in code order
    pub const ALL: [GlobalStatus; 16] = [
        GlobalStatus::UnKnown,
        GlobalStatus::Begin,
        GlobalStatus::Committing,
        GlobalStatus::CommitRetrying,
        GlobalStatus::Rollbacking,
        GlobalStatus::RollbackRetrying,
        GlobalStatus::TimeoutRollbacking,
        GlobalStatus::TimeoutRollbackRetrying,
        GlobalStatus::AsyncCommitting,
        GlobalStatus::Committed,
        GlobalStatus::CommitFailed,
        GlobalStatus::Rollbacked,
        GlobalStatus::RollbackFailed,
        GlobalStatus::TimeoutRollbacked,
        GlobalStatus::TimeoutRollbackFailed,
        GlobalStatus::Finished,
    ];

    /// Stable numeric code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a numeric code, mapping unknown codes to [`GlobalStatus::UnKnown`]
    pub fn from_code(code: u8) -> Self {
        Self::ALL
            .get(code as usize)
            .copied()
            .unwrap_or(GlobalStatus::UnKnown)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GlobalStatus::Committed
                | GlobalStatus::CommitFailed
                | GlobalStatus::Rollbacked
                | GlobalStatus::RollbackFailed
                | GlobalStatus::TimeoutRollbacked
                | GlobalStatus::TimeoutRollbackFailed
                | GlobalStatus::Finished
        )
    }

    /// Statuses belonging to the rollback family (client or timeout initiated)
    pub fn is_rollbacking(self) -> bool {
        matches!(
            self,
            GlobalStatus::Rollbacking
                | GlobalStatus::RollbackRetrying
                | GlobalStatus::TimeoutRollbacking
                | GlobalStatus::TimeoutRollbackRetrying
        )
    }

    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            GlobalStatus::TimeoutRollbacking
                | GlobalStatus::TimeoutRollbackRetrying
                | GlobalStatus::TimeoutRollbacked
                | GlobalStatus::TimeoutRollbackFailed
        )
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(self, next: GlobalStatus) -> bool {
        use GlobalStatus::*;

        if self.is_terminal() || next == UnKnown {
            return false;
        }
        if next == Finished {
            return true;
        }

        match self {
            Begin => matches!(
                next,
                Committing
                    | AsyncCommitting
                    | CommitRetrying
                    | Rollbacking
                    | RollbackRetrying
                    | TimeoutRollbacking
                    | TimeoutRollbackRetrying
            ),
            Committing => matches!(next, Committed | CommitFailed | CommitRetrying),
            CommitRetrying | AsyncCommitting => matches!(next, Committed | CommitFailed),
            Rollbacking => matches!(next, Rollbacked | RollbackFailed | RollbackRetrying),
            RollbackRetrying => matches!(next, Rollbacked | RollbackFailed),
            TimeoutRollbacking => matches!(
                next,
                Rollbacked | TimeoutRollbacked | TimeoutRollbackFailed | TimeoutRollbackRetrying
            ),
            TimeoutRollbackRetrying => {
                matches!(next, Rollbacked | TimeoutRollbacked | TimeoutRollbackFailed)
            }
            // UnKnown sessions can only be resolved by a client report.
            UnKnown => false,
            _ => false,
        }
    }
}

impl fmt::Display for GlobalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status of one branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchStatus {
    Unknown,
    Registered,
    PhaseOneDone,
    PhaseOneFailed,
    PhaseOneTimeout,
    PhaseTwoCommitted,
    PhaseTwoCommitFailedRetryable,
    PhaseTwoCommitFailedUnretryable,
    PhaseTwoRollbacked,
    PhaseTwoRollbackFailedRetryable,
    PhaseTwoRollbackFailedUnretryable,
}

impl BranchStatus {
    const ALL: [BranchStatus; 11] = [
        BranchStatus::Unknown,
        BranchStatus::Registered,
        BranchStatus::PhaseOneDone,
        BranchStatus::PhaseOneFailed,
        BranchStatus::PhaseOneTimeout,
        BranchStatus::PhaseTwoCommitted,
        BranchStatus::PhaseTwoCommitFailedRetryable,
        BranchStatus::PhaseTwoCommitFailedUnretryable,
        BranchStatus::PhaseTwoRollbacked,
        BranchStatus::PhaseTwoRollbackFailedRetryable,
        BranchStatus::PhaseTwoRollbackFailedUnretryable,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Self {
        Self::ALL
            .get(code as usize)
            .copied()
            .unwrap_or(BranchStatus::Unknown)
    }

    /// Phase one outcomes a branch may report for itself
    pub fn is_phase_one(self) -> bool {
        matches!(
            self,
            BranchStatus::PhaseOneDone | BranchStatus::PhaseOneFailed | BranchStatus::PhaseOneTimeout
        )
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transaction mode of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchType {
    /// Automatic mode: undo logs plus coordinator row locks
    AT,
    TCC,
    SAGA,
    XA,
}

impl BranchType {
    /// AT branches only need their undo logs dropped in phase two, so a global
    /// commit made solely of AT branches can finish asynchronously.
    pub fn can_async_commit(self) -> bool {
        matches!(self, BranchType::AT)
    }
}
