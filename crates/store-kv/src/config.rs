//! Keyspace configuration

use std::path::PathBuf;

/// Configuration for the kv backend
#[derive(Clone)]
pub struct KvConfig {
    /// Directory for keyspace data
    pub data_dir: PathBuf,

    /// Block cache size for fjall (in bytes)
    pub block_cache_size: u64,

    /// Persist mode applied after every committed batch
    pub persist_mode: fjall::PersistMode,
}

impl KvConfig {
    /// Create a config for the given data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            block_cache_size: 16 * 1024 * 1024, // 16 MB
            persist_mode: fjall::PersistMode::SyncAll,
        }
    }

    /// Set block cache size
    pub fn with_block_cache_size(mut self, size: u64) -> Self {
        self.block_cache_size = size;
        self
    }

    /// Set persist mode
    pub fn with_persist_mode(mut self, mode: fjall::PersistMode) -> Self {
        self.persist_mode = mode;
        self
    }
}
