//! Filesystem-based session log
//!
//! Each session is one JSON document named after its xid. Writes go to a
//! temporary file that is synced and then renamed over the old document, so a
//! crash leaves either the previous or the new state on disk.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tc_common::{Xid, now_millis};
use tc_store::{
    LogEntry, Result, SessionCondition, SessionSnapshot, StoreError, TransactionStore,
};
use tracing::{debug, warn};

const SESSION_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Filesystem-based session log
pub struct FileStore {
    /// Directory holding one document per session
    base_path: PathBuf,
    /// In-memory copy of every document on disk
    sessions: RwLock<HashMap<Xid, SessionSnapshot>>,
}

impl FileStore {
    /// Open (or create) a store under `base_path`, loading existing sessions
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();

        fs::create_dir_all(&base_path).map_err(|e| {
            StoreError::Open(format!(
                "Failed to create session directory {}: {e}",
                base_path.display()
            ))
        })?;

        let sessions = Self::load_from_disk(&base_path)?;
        debug!(
            path = %base_path.display(),
            sessions = sessions.len(),
            "Opened file session store"
        );

        Ok(Self {
            base_path,
            sessions: RwLock::new(sessions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    /// Number of stored sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn session_file(&self, xid: &Xid) -> PathBuf {
        // ':' is not portable in file names
        let name = xid.to_string().replace(':', "_");
        self.base_path.join(format!("{name}.{SESSION_EXTENSION}"))
    }

    fn load_from_disk(base_path: &Path) -> Result<HashMap<Xid, SessionSnapshot>> {
        let mut sessions = HashMap::new();

        for entry in fs::read_dir(base_path)?.filter_map(std::result::Result::ok) {
            let path = entry.path();
            match path.extension().and_then(|s| s.to_str()) {
                Some(SESSION_EXTENSION) => {}
                Some(TEMP_EXTENSION) => {
                    // Leftover of a write that never got renamed
                    let _ = fs::remove_file(&path);
                    continue;
                }
                _ => continue,
            }

            let contents = fs::read(&path)?;
            match serde_json::from_slice::<SessionSnapshot>(&contents) {
                Ok(session) => {
                    sessions.insert(session.global.xid.clone(), session);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                }
            }
        }

        Ok(sessions)
    }

    fn persist(&self, xid: &Xid, session: &SessionSnapshot) -> Result<()> {
        let target = self.session_file(xid);
        let temp = target.with_extension(TEMP_EXTENSION);

        let bytes = serde_json::to_vec(session)?;
        let mut file = File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&temp, &target)?;
        Ok(())
    }

    fn delete(&self, xid: &Xid) -> Result<()> {
        match fs::remove_file(self.session_file(xid)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TransactionStore for FileStore {
    fn write(&self, entry: &LogEntry) -> Result<()> {
        let xid = entry.record.xid();
        // Hold the write lock across the disk write so the cache never runs
        // ahead of the document.
        let mut sessions = self.sessions.write();
        let current = sessions.get(xid).cloned();
        match SessionSnapshot::apply(current, entry)? {
            Some(next) => {
                self.persist(xid, &next)?;
                sessions.insert(xid.clone(), next);
            }
            None => {
                self.delete(xid)?;
                sessions.remove(xid);
            }
        }
        Ok(())
    }

    fn read(&self, xid: &Xid, with_branches: bool) -> Result<Option<SessionSnapshot>> {
        Ok(self.sessions.read().get(xid).map(|session| {
            let mut session = session.clone();
            if !with_branches {
                session.branches.clear();
            }
            session
        }))
    }

    fn read_by_condition(&self, condition: &SessionCondition) -> Result<Vec<SessionSnapshot>> {
        let now = now_millis();
        let mut matched: Vec<SessionSnapshot> = self
            .sessions
            .read()
            .values()
            .filter(|session| condition.matches(&session.global, now))
            .cloned()
            .map(|mut session| {
                if !condition.with_branches {
                    session.branches.clear();
                }
                session
            })
            .collect();

        matched.sort_by_key(|s| (s.global.begin_time_ms, s.global.transaction_id));
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_common::GlobalStatus;
    use tc_store::LogOperation;
    use tc_store::testing::{self, branch_record, global_record};
    use tempfile::TempDir;

    #[test]
    fn test_session_log() {
        let dir = TempDir::new().unwrap();
        testing::check_session_log(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_condition_queries() {
        let dir = TempDir::new().unwrap();
        testing::check_condition_queries(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_sessions_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let global = global_record("10.0.0.1:8091:12345", GlobalStatus::Committing);
        let branch = branch_record(&global, 1, "order_tbl:pk=7");

        {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .write(&LogEntry::global(LogOperation::GlobalAdd, global.clone()))
                .unwrap();
            store
                .write(&LogEntry::branch(LogOperation::BranchAdd, branch.clone()))
                .unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        let session = store.read(&global.xid, true).unwrap().unwrap();
        assert_eq!(session.global, global);
        assert_eq!(session.branches, vec![branch]);

        store
            .write(&LogEntry::global(LogOperation::GlobalRemove, global.clone()))
            .unwrap();
        drop(store);
        assert!(FileStore::open(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("garbage.json"), b"not json").unwrap();
        fs::write(dir.path().join("half-written.tmp"), b"{").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.is_empty());
        assert!(!dir.path().join("half-written.tmp").exists());
    }
}
