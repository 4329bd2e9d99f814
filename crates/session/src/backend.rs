//! Backend selection

use std::sync::Arc;
use tc_store::{DistributedLocker, LockStore, StoreConfig, StoreError, StoreMode, TransactionStore};
use tc_store_file::FileStore;
use tc_store_kv::{KvConfig, KvStore};
use tc_store_memory::{MemoryLockStore, MemoryLocker, MemoryStore};
use tracing::info;

/// The three capabilities of an opened backend
#[derive(Clone)]
pub struct Backend {
    pub sessions: Arc<dyn TransactionStore>,
    pub locks: Arc<dyn LockStore>,
    pub scheduled: Arc<dyn DistributedLocker>,
}

impl Backend {
    pub fn new(
        sessions: Arc<dyn TransactionStore>,
        locks: Arc<dyn LockStore>,
        scheduled: Arc<dyn DistributedLocker>,
    ) -> Self {
        Self {
            sessions,
            locks,
            scheduled,
        }
    }

    /// Process-local backend
    pub fn memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLockStore::new()),
            Arc::new(MemoryLocker::new()),
        )
    }
}

/// Open the backend selected by `config.mode`
///
/// The file backend keeps its row locks and scheduled locks in memory; they
/// are rebuilt from the session log on reload.
pub fn open_backend(config: &StoreConfig) -> Result<Backend, StoreError> {
    let backend = match config.mode {
        StoreMode::Memory => Backend::memory(),
        StoreMode::File => Backend::new(
            Arc::new(FileStore::open(&config.dir)?),
            Arc::new(MemoryLockStore::new()),
            Arc::new(MemoryLocker::new()),
        ),
        StoreMode::Kv => {
            let store = Arc::new(
                KvStore::open(KvConfig::new(&config.dir))
                    .map_err(|e| StoreError::Open(e.to_string()))?,
            );
            Backend::new(store.clone(), store.clone(), store)
        }
    };

    info!(mode = %config.mode, dir = %config.dir.display(), "Opened session store");
    Ok(backend)
}
