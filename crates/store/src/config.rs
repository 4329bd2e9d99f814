//! Backend selection and configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Error for a store mode name that matches no backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown store mode: {0}. Must be one of: memory, file, kv")]
pub struct UnknownStoreMode(pub String);

/// Which backend holds the session log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StoreMode {
    /// Process-local maps; nothing survives a restart
    #[default]
    Memory,
    /// One JSON document per xid under a directory
    File,
    /// Embedded key-value keyspace (redis-style key layout)
    Kv,
}

impl FromStr for StoreMode {
    type Err = UnknownStoreMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreMode::Memory),
            "file" => Ok(StoreMode::File),
            "kv" | "redis" => Ok(StoreMode::Kv),
            _ => Err(UnknownStoreMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for StoreMode {
    type Error = UnknownStoreMode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StoreMode> for String {
    fn from(mode: StoreMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::Memory => write!(f, "memory"),
            StoreMode::File => write!(f, "file"),
            StoreMode::Kv => write!(f, "kv"),
        }
    }
}

/// Configuration for the session store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub mode: StoreMode,

    /// Directory for the file and kv backends
    pub dir: PathBuf,

    /// Lease of a scheduled lock; a crashed holder loses it after this long
    pub lock_lease_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: StoreMode::Memory,
            dir: PathBuf::from("sessionStore"),
            lock_lease_ms: 60_000,
        }
    }
}

impl StoreConfig {
    /// Create a config for `mode` rooted at `dir`
    pub fn new(mode: StoreMode, dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the scheduled lock lease
    pub fn with_lock_lease_ms(mut self, lease_ms: u64) -> Self {
        self.lock_lease_ms = lease_ms;
        self
    }
}
