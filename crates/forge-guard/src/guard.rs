//! The stability guard

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::store::StateStore;
use crate::{
    content_hash, Clock, FileStabilityRecord, FileStatus, GuardConfig, GuardError, Lease,
    SystemClock,
};

/// Result of [`StabilityGuard::try_acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    /// The caller now holds the lease
    Granted,
    /// The file is locked for oscillation or fatigue
    Locked,
    /// Another live pipeline holds the file
    Busy {
        /// Session id of the holder
        holder: String,
    },
}

impl Acquire {
    /// Whether the lease was granted
    #[inline]
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Per-project stability guard.
///
/// Cheap to clone. All methods block on the state file lock; async callers
/// should run them on a blocking thread.
#[derive(Debug, Clone)]
pub struct StabilityGuard {
    root: PathBuf,
    store: StateStore,
    config: GuardConfig,
    clock: Arc<dyn Clock>,
}

impl StabilityGuard {
    /// Guard for `root`, state under `<root>/.forge`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, GuardConfig::default(), Arc::new(SystemClock))
    }

    /// Guard with explicit thresholds and clock
    #[must_use]
    pub fn with_config(
        root: impl Into<PathBuf>,
        config: GuardConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let root = root.into();
        let store = StateStore::new(root.join(".forge"));
        Self {
            root,
            store,
            config,
            clock,
        }
    }

    /// Project root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Thresholds in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Location of the persisted state
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.store.state_path()
    }

    /// Whether `path` is locked. Unlocks (and persists) a record whose
    /// cooldown has elapsed.
    ///
    /// # Errors
    /// Returns [`GuardError`] on lock-file I/O or a path outside the root.
    pub fn is_locked(&self, path: &Path) -> Result<bool, GuardError> {
        let key = self.key_for(path)?;
        let now = self.clock.now();
        self.store.update(|state| match state.get_mut(&key) {
            Some(record) => {
                let changed = record.refresh(now, &self.config);
                if changed {
                    tracing::info!(path = %key, "cooldown elapsed, file unlocked");
                }
                (record.is_locked(), changed)
            }
            None => (false, false),
        })
    }

    /// Record an automated edit producing `content`.
    ///
    /// Returns `true` while the file stays stable, `false` once this edit
    /// locked it (or it was already locked).
    ///
    /// # Errors
    /// Returns [`GuardError`] on I/O failure.
    pub fn record_edit(&self, path: &Path, content: &[u8]) -> Result<bool, GuardError> {
        let key = self.key_for(path)?;
        let hash = content_hash(content);
        let now = self.clock.now();
        self.store.update(|state| {
            let record = state.entry(key.clone()).or_default();
            match record.apply_edit(hash, now, &self.config) {
                Some(reason) => {
                    tracing::warn!(
                        path = %key,
                        reason = reason.as_str(),
                        edits = record.edit_count_24h,
                        "file locked against further mutation"
                    );
                    metrics::counter!("forge_guard_locks_total", "reason" => reason.as_str())
                        .increment(1);
                    (false, true)
                }
                None => {
                    tracing::debug!(path = %key, edits = record.edit_count_24h, "edit recorded");
                    (!record.is_locked(), true)
                }
            }
        })
    }

    /// Atomically check the lock and take the in-flight lease for `session`.
    ///
    /// A lease older than the configured TTL is treated as abandoned.
    /// Re-acquiring with the same session renews the lease.
    ///
    /// # Errors
    /// Returns [`GuardError`] on I/O failure.
    pub fn try_acquire(&self, path: &Path, session: &str) -> Result<Acquire, GuardError> {
        let key = self.key_for(path)?;
        let now = self.clock.now();
        self.store.update(|state| {
            let record = state.entry(key.clone()).or_default();
            let refreshed = record.refresh(now, &self.config);
            if record.is_locked() {
                return (Acquire::Locked, refreshed);
            }
            if let Some(lease) = record.foreign_lease(session, now, &self.config) {
                return (
                    Acquire::Busy {
                        holder: lease.session.clone(),
                    },
                    refreshed,
                );
            }
            record.lease = Some(Lease {
                session: session.to_string(),
                acquired_at: now,
            });
            tracing::debug!(path = %key, session, "lease granted");
            (Acquire::Granted, true)
        })
    }

    /// Drop the lease if `session` holds it. Returns whether it did.
    ///
    /// # Errors
    /// Returns [`GuardError`] on I/O failure.
    pub fn release(&self, path: &Path, session: &str) -> Result<bool, GuardError> {
        let key = self.key_for(path)?;
        self.store.update(|state| {
            let Some(record) = state.get_mut(&key) else {
                return (false, false);
            };
            if record.lease.as_ref().is_some_and(|l| l.session == session) {
                record.lease = None;
                (true, true)
            } else {
                (false, false)
            }
        })
    }

    /// Current record for `path`, if any
    ///
    /// # Errors
    /// Returns [`GuardError`] on I/O failure.
    pub fn record(&self, path: &Path) -> Result<Option<FileStabilityRecord>, GuardError> {
        let key = self.key_for(path)?;
        Ok(self.store.snapshot()?.remove(&key))
    }

    /// Every tracked record keyed by relative path
    ///
    /// # Errors
    /// Returns [`GuardError`] on I/O failure.
    pub fn records(&self) -> Result<BTreeMap<String, FileStabilityRecord>, GuardError> {
        self.store.snapshot()
    }

    /// Manually reset a file: active, zero edits, history and lease cleared.
    /// Returns whether a record existed.
    ///
    /// # Errors
    /// Returns [`GuardError`] on I/O failure.
    pub fn unlock(&self, path: &Path) -> Result<bool, GuardError> {
        let key = self.key_for(path)?;
        self.store.update(|state| match state.get_mut(&key) {
            Some(record) => {
                record.status = FileStatus::Active;
                record.edit_count_24h = 0;
                record.recent_hashes.clear();
                record.lease = None;
                tracing::info!(path = %key, "file manually unlocked");
                (true, true)
            }
            None => (false, false),
        })
    }

    /// State key: `/`-separated path relative to the root
    fn key_for(&self, path: &Path) -> Result<String, GuardError> {
        let relative = if path.is_absolute() {
            match path.strip_prefix(&self.root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => {
                    let canonical_root = self
                        .root
                        .canonicalize()
                        .map_err(|e| GuardError::io(&self.root, e))?;
                    let canonical = path
                        .canonicalize()
                        .map_err(|_| GuardError::OutsideRoot(path.to_path_buf()))?;
                    canonical
                        .strip_prefix(&canonical_root)
                        .map_err(|_| GuardError::OutsideRoot(path.to_path_buf()))?
                        .to_path_buf()
                }
            }
        } else {
            path.to_path_buf()
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(GuardError::OutsideRoot(path.to_path_buf())),
            }
        }
        if parts.is_empty() {
            return Err(GuardError::OutsideRoot(path.to_path_buf()));
        }
        Ok(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use chrono::Duration;

    fn guard() -> (tempfile::TempDir, StabilityGuard, Arc<ManualClock>) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let guard = StabilityGuard::with_config(dir.path(), GuardConfig::default(), clock.clone());
        (dir, guard, clock)
    }

    #[test]
    fn oscillation_locks_on_third_edit() {
        let (_dir, guard, _clock) = guard();
        let path = Path::new("src/app.py");
        assert!(guard.record_edit(path, b"A").unwrap());
        assert!(guard.record_edit(path, b"B").unwrap());
        assert!(!guard.record_edit(path, b"A").unwrap());
        assert!(guard.is_locked(path).unwrap());
    }

    #[test]
    fn fatigue_locks_on_tenth_edit() {
        let (_dir, guard, _clock) = guard();
        let path = Path::new("lib.rs");
        for i in 0..9 {
            assert!(guard.record_edit(path, format!("v{i}").as_bytes()).unwrap(), "edit {i}");
        }
        assert!(!guard.record_edit(path, b"v9").unwrap());
        assert!(guard.is_locked(path).unwrap());
    }

    #[test]
    fn cooldown_unlocks_and_resets_counter() {
        let (_dir, guard, clock) = guard();
        let path = Path::new("a.py");
        guard.record_edit(path, b"A").unwrap();
        guard.record_edit(path, b"A").unwrap();
        assert!(guard.is_locked(path).unwrap());

        clock.advance(Duration::minutes(59));
        assert!(guard.is_locked(path).unwrap());

        clock.advance(Duration::minutes(2));
        assert!(!guard.is_locked(path).unwrap());
        let record = guard.record(path).unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Active);
        assert_eq!(record.edit_count_24h, 0);
    }

    #[test]
    fn lease_excludes_second_session() {
        let (_dir, guard, clock) = guard();
        let path = Path::new("x.rs");
        assert_eq!(guard.try_acquire(path, "s1").unwrap(), Acquire::Granted);
        assert_eq!(
            guard.try_acquire(path, "s2").unwrap(),
            Acquire::Busy { holder: "s1".into() }
        );
        assert!(guard.release(path, "s1").unwrap());
        assert_eq!(guard.try_acquire(path, "s2").unwrap(), Acquire::Granted);

        // abandoned lease expires
        clock.advance(Duration::hours(2));
        assert_eq!(guard.try_acquire(path, "s3").unwrap(), Acquire::Granted);
    }

    #[test]
    fn locked_file_refuses_lease() {
        let (_dir, guard, _clock) = guard();
        let path = Path::new("y.rs");
        guard.record_edit(path, b"same").unwrap();
        guard.record_edit(path, b"same").unwrap();
        assert_eq!(guard.try_acquire(path, "s1").unwrap(), Acquire::Locked);
    }

    #[test]
    fn release_by_non_holder_is_noop() {
        let (_dir, guard, _clock) = guard();
        let path = Path::new("z.rs");
        guard.try_acquire(path, "s1").unwrap();
        assert!(!guard.release(path, "s2").unwrap());
        assert!(guard.record(path).unwrap().unwrap().lease.is_some());
    }

    #[test]
    fn absolute_and_relative_paths_share_a_key() {
        let (dir, guard, _clock) = guard();
        guard.record_edit(&dir.path().join("pkg/mod.py"), b"A").unwrap();
        assert!(!guard.record_edit(Path::new("pkg/mod.py"), b"A").unwrap());
    }

    #[test]
    fn parent_components_are_rejected() {
        let (_dir, guard, _clock) = guard();
        assert!(matches!(
            guard.is_locked(Path::new("../escape.rs")),
            Err(GuardError::OutsideRoot(_))
        ));
    }

    #[test]
    fn manual_unlock() {
        let (_dir, guard, _clock) = guard();
        let path = Path::new("m.rs");
        guard.record_edit(path, b"A").unwrap();
        guard.record_edit(path, b"A").unwrap();
        assert!(guard.unlock(path).unwrap());
        assert!(!guard.is_locked(path).unwrap());
        assert!(guard.record_edit(path, b"A").unwrap());
    }
}
