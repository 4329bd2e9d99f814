//! Lifecycle events and listeners

use crate::error::Result;
use crate::global::GlobalSession;
use std::fmt;
use std::sync::Arc;
use tc_common::{BranchStatus, GlobalStatus};
use tc_store::{BranchRecord, GlobalRecord};

/// What happened to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventKind {
    Begin,
    StatusChange(GlobalStatus),
    BranchStatusChange(BranchStatus),
    AddBranch,
    RemoveBranch,
    Close,
    End,
}

/// A session mutation about to become visible
///
/// `record` and `branch` carry the state after the mutation. Listeners see the
/// event before the in-memory session changes.
pub struct LifecycleEvent<'a> {
    pub kind: LifecycleEventKind,
    pub session: &'a GlobalSession,
    pub record: &'a GlobalRecord,
    pub branch: Option<&'a BranchRecord>,
}

/// Observer of session lifecycle events
pub trait SessionLifecycleListener: Send + Sync {
    /// Unique name; a session holds at most one listener per name
    fn name(&self) -> &str;

    /// Whether this listener's failure must abort the mutation
    fn is_log_authority(&self) -> bool {
        false
    }

    fn on_event(&self, event: &LifecycleEvent<'_>) -> Result<()>;
}

/// Non-owning entry in a session's listener list
#[derive(Clone)]
pub struct ListenerHandle {
    name: String,
    listener: Arc<dyn SessionLifecycleListener>,
}

impl ListenerHandle {
    pub fn new(listener: Arc<dyn SessionLifecycleListener>) -> Self {
        Self {
            name: listener.name().to_string(),
            listener,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listener(&self) -> &dyn SessionLifecycleListener {
        self.listener.as_ref()
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ListenerHandle").field(&self.name).finish()
    }
}
