//! Session management for the transaction coordinator
//!
//! - [`GlobalSession`] / [`BranchSession`]: the state machine of one global
//!   transaction and its branches
//! - [`SessionManager`]: a view over the durable session log; the root view
//!   logs every lifecycle event before it becomes visible
//! - [`SessionHolder`]: the root view plus the async-commit, retry-commit and
//!   retry-rollback queues, scheduled locks and crash recovery

mod backend;
mod branch;
mod error;
mod global;
mod holder;
mod listener;
mod manager;

pub use backend::{Backend, open_backend};
pub use branch::BranchSession;
pub use error::{Result, SessionError};
pub use global::GlobalSession;
pub use holder::SessionHolder;
pub use listener::{LifecycleEvent, LifecycleEventKind, ListenerHandle, SessionLifecycleListener};
pub use manager::{ManagerKind, SessionManager};
