//! Per-attempt scratch space.
//!
//! Each attempt gets `<root>/.forge/sessions/<session>/`, the only directory
//! generated test programs may write to. The observation file lives there and
//! the generated test file is tracked so both are gone when the scratch is
//! dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::types::SessionId;

/// Environment variable carrying the root-relative observation path
pub const OBSERVATIONS_ENV: &str = "FORGE_OBSERVATIONS";

const OBSERVATIONS_FILE: &str = "observations.json";

/// Why the observation file could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ObservationError {
    Missing,
    Malformed(String),
}

#[derive(Debug)]
pub(crate) struct SessionScratch {
    root: PathBuf,
    relative: PathBuf,
    test_files: Vec<PathBuf>,
}

impl SessionScratch {
    pub(crate) fn create(root: &Path, session: &SessionId) -> io::Result<Self> {
        let relative = Path::new(".forge").join("sessions").join(session.short());
        fs::create_dir_all(root.join(&relative))?;
        Ok(Self {
            root: root.to_path_buf(),
            relative,
            test_files: Vec::new(),
        })
    }

    /// Root-relative directory, mounted writable in the sandbox
    pub(crate) fn relative_dir(&self) -> &Path {
        &self.relative
    }

    /// Root-relative observation path with `/` separators
    pub(crate) fn observation_rel(&self) -> String {
        let joined = self.relative.join(OBSERVATIONS_FILE);
        joined
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn observation_path(&self) -> PathBuf {
        self.root.join(&self.relative).join(OBSERVATIONS_FILE)
    }

    /// Write the generated test program; refuses to clobber existing files.
    pub(crate) fn write_test(&mut self, relative: &Path, code: &str) -> io::Result<()> {
        let path = self.root.join(relative);
        if path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", relative.display()),
            ));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, code)?;
        self.test_files.push(path);
        Ok(())
    }

    /// Delete test programs written so far
    pub(crate) fn remove_tests(&mut self) {
        for path in self.test_files.drain(..) {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "failed to remove test file: {}", e);
                }
            }
        }
    }

    /// Remove a stale observation file before a new test run
    pub(crate) fn clear_observations(&self) {
        let _ = fs::remove_file(self.observation_path());
    }

    pub(crate) fn has_observations(&self) -> bool {
        self.observation_path().is_file()
    }

    /// Parse the observation array
    pub(crate) fn read_observations(&self) -> Result<Vec<i64>, ObservationError> {
        let text = match fs::read_to_string(self.observation_path()) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ObservationError::Missing),
            Err(e) => return Err(ObservationError::Malformed(e.to_string())),
        };
        serde_json::from_str::<Vec<i64>>(&text).map_err(|e| ObservationError::Malformed(e.to_string()))
    }
}

impl Drop for SessionScratch {
    fn drop(&mut self) {
        self.remove_tests();
        let dir = self.root.join(&self.relative);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %dir.display(), "failed to remove session scratch: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_and_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let sid = SessionId::new();
        let mut scratch = SessionScratch::create(root.path(), &sid).unwrap();

        assert_eq!(
            scratch.observation_rel(),
            format!(".forge/sessions/{}/observations.json", sid.short())
        );
        assert!(root.path().join(scratch.relative_dir()).is_dir());

        scratch.write_test(Path::new("tests/test_app.py"), "pass\n").unwrap();
        assert!(root.path().join("tests/test_app.py").is_file());
        drop(scratch);

        assert!(!root.path().join("tests/test_app.py").exists());
        assert!(!root.path().join(".forge/sessions").join(sid.short()).exists());
    }

    #[test]
    fn refuses_to_overwrite_project_files() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("conftest.py"), "keep").unwrap();
        let mut scratch = SessionScratch::create(root.path(), &SessionId::new()).unwrap();

        let err = scratch.write_test(Path::new("conftest.py"), "x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        drop(scratch);
        assert_eq!(fs::read_to_string(root.path().join("conftest.py")).unwrap(), "keep");
    }

    #[test]
    fn observation_parsing() {
        let root = tempfile::tempdir().unwrap();
        let scratch = SessionScratch::create(root.path(), &SessionId::new()).unwrap();
        assert_eq!(scratch.read_observations(), Err(ObservationError::Missing));
        assert!(!scratch.has_observations());

        fs::write(root.path().join(scratch.observation_rel()), "[0, 1, 0]").unwrap();
        assert_eq!(scratch.read_observations(), Ok(vec![0, 1, 0]));

        fs::write(root.path().join(scratch.observation_rel()), "{\"passed\": 3}").unwrap();
        assert!(matches!(scratch.read_observations(), Err(ObservationError::Malformed(_))));

        scratch.clear_observations();
        assert!(!scratch.has_observations());
    }
}
