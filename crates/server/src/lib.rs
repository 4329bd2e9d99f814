//! Transaction coordinator server
//!
//! Ties the session holder to the outside world:
//! - [`RequestHandler`] answers client requests (begin, register, commit, ...)
//! - [`Coordinator`] drives phase two through a [`BranchDriver`]
//! - [`scheduler`] runs the recovery tasks (async commit, retries, timeouts,
//!   undo log cleanup) under their cluster-wide scheduled locks
//!
//! Network transport is left to the embedding process: it decodes requests
//! into [`RequestMessage`] (or hands JSON to [`RequestHandler::handle_bytes`])
//! and implements [`BranchDriver`] for the outbound calls.

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod handler;
pub mod message;
pub mod scheduler;
pub mod server;

pub use config::{NodeConfig, RetryConfig, SchedulerConfig, ServerConfig};
pub use coordinator::{BeginRequest, Coordinator, RegisterRequest};
pub use driver::BranchDriver;
pub use error::{ConfigError, Result, ServerError, TransactionErrorCode};
pub use handler::RequestHandler;
pub use message::{RequestMessage, ResultBody, ResultCode, ResultMessage};
pub use server::Server;
