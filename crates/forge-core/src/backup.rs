//! Snapshot of a target file taken before it is overwritten.
//!
//! The snapshot lives next to the target as `<file>.<session>.bak`. While
//! armed, dropping a [`Backup`] puts the original content back, so a dropped
//! or panicking pipeline never leaves unverified code behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::types::SessionId;

/// Armed snapshot of one file
#[derive(Debug)]
pub struct Backup {
    target: PathBuf,
    path: PathBuf,
    armed: bool,
}

impl Backup {
    /// Copy `target` aside.
    ///
    /// # Errors
    /// Fails if the target cannot be read or the copy cannot be written.
    pub fn create(target: &Path, session: &SessionId) -> io::Result<Self> {
        let name = target
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"))?
            .to_string_lossy();
        let path = target.with_file_name(format!("{name}.{}.bak", session.short()));
        fs::copy(target, &path)?;
        Ok(Self {
            target: target.to_path_buf(),
            path,
            armed: true,
        })
    }

    /// Location of the snapshot
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Put the snapshot back over the target and delete it.
    ///
    /// # Errors
    /// Fails if the rename fails; the snapshot is then left in place.
    pub fn restore(mut self) -> io::Result<()> {
        self.armed = false;
        fs::rename(&self.path, &self.target)
    }

    /// Keep the new content and delete the snapshot.
    ///
    /// # Errors
    /// Fails if the snapshot cannot be removed.
    pub fn discard(mut self) -> io::Result<()> {
        self.armed = false;
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for Backup {
    fn drop(&mut self) {
        if self.armed {
            match fs::rename(&self.path, &self.target) {
                Ok(()) => tracing::warn!(target_file = %self.target.display(), "restored abandoned backup"),
                Err(e) => tracing::error!(
                    target_file = %self.target.display(),
                    backup = %self.path.display(),
                    "failed to restore backup: {}",
                    e
                ),
            }
        }
    }
}
