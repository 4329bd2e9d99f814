//! Key-value backend on an embedded fjall keyspace
//!
//! A single [`KvStore`] serves as session log, row lock table and scheduled
//! locker. Keys follow a redis-style layout split over partitions:
//! - `global`: xid -> global record
//! - `branch`: xid, 0, branch id -> branch record
//! - `status`: status code, xid -> () (queue working sets)
//! - `row_lock`: row key -> holder
//! - `xid_lock`: xid, 0, row key -> () (rows held per transaction)
//! - `scheduled_lock`: lock name -> owner and lease

mod config;
mod encoding;
mod error;
mod store;

pub use config::KvConfig;
pub use error::{Error, Result};
pub use store::KvStore;
