//! Locked read-modify-write of the state file

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::{FileStabilityRecord, GuardError};

pub(crate) type StateMap = BTreeMap<String, FileStabilityRecord>;

const STATE_FILE: &str = "stability.json";
const LOCK_FILE: &str = "stability.lock";

#[derive(Debug, Clone)]
pub(crate) struct StateStore {
    dir: PathBuf,
}

/// Exclusive advisory lock, released on drop
struct StateLock {
    file: File,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("failed to release guard state lock: {}", e);
        }
    }
}

impl StateStore {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub(crate) fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn lock(&self) -> Result<StateLock, GuardError> {
        fs::create_dir_all(&self.dir).map_err(|e| GuardError::io(&self.dir, e))?;
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| GuardError::io(&path, e))?;
        file.lock_exclusive().map_err(|e| GuardError::io(&path, e))?;
        Ok(StateLock { file })
    }

    /// Run `f` on the current state under the lock; persist when it reports a change.
    pub(crate) fn update<R>(
        &self,
        f: impl FnOnce(&mut StateMap) -> (R, bool),
    ) -> Result<R, GuardError> {
        let _lock = self.lock()?;
        let mut state = self.load();
        let (result, dirty) = f(&mut state);
        if dirty {
            self.persist(&state)?;
        }
        Ok(result)
    }

    /// Read the state under the lock without modifying it
    pub(crate) fn snapshot(&self) -> Result<StateMap, GuardError> {
        let _lock = self.lock()?;
        Ok(self.load())
    }

    fn load(&self) -> StateMap {
        let path = self.state_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StateMap::new(),
            Err(e) => {
                tracing::warn!("guard state {} unreadable, starting empty: {}", path.display(), e);
                return StateMap::new();
            }
        };
        if raw.trim().is_empty() {
            return StateMap::new();
        }
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!("guard state {} corrupt, starting empty: {}", path.display(), e);
            StateMap::new()
        })
    }

    fn persist(&self, state: &StateMap) -> Result<(), GuardError> {
        let path = self.state_path();
        let tmp = path.with_extension("json.tmp");
        let encoded = serde_json::to_vec_pretty(state)?;
        write_synced(&tmp, &encoded)?;
        fs::rename(&tmp, &path).map_err(|e| GuardError::io(&path, e))
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), GuardError> {
    let mut file = File::create(path).map_err(|e| GuardError::io(path, e))?;
    file.write_all(bytes).map_err(|e| GuardError::io(path, e))?;
    file.sync_all().map_err(|e| GuardError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_state_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(store.state_path(), "{ not json").unwrap();
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn update_persists_only_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .update(|state| {
                state.insert("a.rs".into(), FileStabilityRecord::default());
                ((), false)
            })
            .unwrap();
        assert!(!store.state_path().exists());

        store
            .update(|state| {
                state.insert("a.rs".into(), FileStabilityRecord::default());
                ((), true)
            })
            .unwrap();
        assert_eq!(store.snapshot().unwrap().len(), 1);
        assert!(!store.state_path().with_extension("json.tmp").exists());
    }
}
