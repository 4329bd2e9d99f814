//! Common types for the transaction coordinator
//!
//! This crate defines:
//! - Global transaction ids (`<ip>:<port>:<transaction-id>`)
//! - Snowflake-style id generation for transactions and branches
//! - Global/branch status codes and the global state machine
//! - Names of the periodic tasks and session queues

mod id;
mod status;
mod task;
mod timestamp;
mod xid;

pub use id::IdGenerator;
pub use status::{BranchStatus, BranchType, GlobalStatus};
pub use task::{
    ASYNC_COMMITTING_SESSION_MANAGER_NAME, RETRY_COMMITTING_SESSION_MANAGER_NAME,
    RETRY_ROLLBACKING_SESSION_MANAGER_NAME, ROOT_SESSION_MANAGER_NAME, ScheduledTask,
};
pub use timestamp::now_millis;
pub use xid::{Xid, XidParseError};
