//! Server configuration
//!
//! Every section has defaults, so an empty TOML document is a valid config:
//!
//! ```toml
//! [node]
//! host = "10.0.0.1"
//! port = 8091
//! node_id = 1
//!
//! [store]
//! mode = "file"
//! dir = "sessionStore"
//!
//! [retry]
//! max_commit_retry_timeout_ms = 30000
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tc_common::ScheduledTask;
use tc_store::{StoreConfig, StoreMode};

/// Largest node id the id generator can encode
const MAX_NODE_ID: u16 = 1023;

/// Address and identity of this coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Host written into every xid begun here
    pub host: String,
    pub port: u16,
    /// Node bits of generated transaction and branch ids
    pub node_id: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8091,
            node_id: 1,
        }
    }
}

/// Periods of the recovery tasks, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub async_committing_period_ms: u64,
    pub committing_retry_period_ms: u64,
    pub rollbacking_retry_period_ms: u64,
    pub timeout_retry_period_ms: u64,
    pub undo_log_delete_period_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            async_committing_period_ms: 1_000,
            committing_retry_period_ms: 1_000,
            rollbacking_retry_period_ms: 1_000,
            timeout_retry_period_ms: 1_000,
            undo_log_delete_period_ms: 86_400_000,
        }
    }
}

impl SchedulerConfig {
    /// How often `task` runs
    pub fn period(&self, task: ScheduledTask) -> Duration {
        let ms = match task {
            ScheduledTask::AsyncCommitting => self.async_committing_period_ms,
            ScheduledTask::RetryCommitting => self.committing_retry_period_ms,
            ScheduledTask::RetryRollbacking => self.rollbacking_retry_period_ms,
            ScheduledTask::TxTimeoutCheck => self.timeout_retry_period_ms,
            ScheduledTask::UndologDelete => self.undo_log_delete_period_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Limits on how long the retry tasks keep trying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Give up on a committing session this long after it began; <= 0 retries forever
    pub max_commit_retry_timeout_ms: i64,
    /// Give up on a rollbacking session this long after it began; <= 0 retries forever
    pub max_rollback_retry_timeout_ms: i64,
    /// Undo logs older than this many days are deleted by the cleanup task
    pub undo_log_save_days: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_commit_retry_timeout_ms: -1,
            max_rollback_retry_timeout_ms: -1,
            undo_log_save_days: 7,
        }
    }
}

impl RetryConfig {
    /// Whether a committing session begun at `begin_time_ms` should be given up
    pub fn commit_retry_expired(&self, begin_time_ms: u64, now_ms: u64) -> bool {
        expired(self.max_commit_retry_timeout_ms, begin_time_ms, now_ms)
    }

    /// Whether a rollbacking session begun at `begin_time_ms` should be given up
    pub fn rollback_retry_expired(&self, begin_time_ms: u64, now_ms: u64) -> bool {
        expired(self.max_rollback_retry_timeout_ms, begin_time_ms, now_ms)
    }
}

fn expired(limit_ms: i64, begin_time_ms: u64, now_ms: u64) -> bool {
    limit_ms > 0 && now_ms.saturating_sub(begin_time_ms) > limit_ms as u64
}

/// Full coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub node: NodeConfig,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
}

impl ServerConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn with_node(mut self, host: impl Into<String>, port: u16, node_id: u16) -> Self {
        self.node = NodeConfig {
            host: host.into(),
            port,
            node_id,
        };
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Select the store backend by name, as given on a command line
    pub fn with_store_mode(mut self, mode: &str) -> Result<Self, ConfigError> {
        self.store.mode = mode.parse::<StoreMode>()?;
        Ok(self)
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.host.trim().is_empty() {
            return Err(ConfigError::Invalid("node.host must not be empty".into()));
        }
        if self.node.node_id > MAX_NODE_ID {
            return Err(ConfigError::Invalid(format!(
                "node.node_id must be at most {MAX_NODE_ID}, got {}",
                self.node.node_id
            )));
        }
        if let Some(task) = ScheduledTask::ALL
            .into_iter()
            .find(|task| self.scheduler.period(*task).is_zero())
        {
            return Err(ConfigError::Invalid(format!(
                "scheduler period of {task} must be positive"
            )));
        }
        if self.store.lock_lease_ms == 0 {
            return Err(ConfigError::Invalid(
                "store.lock_lease_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
