//! Error types for the stability guard

use std::path::PathBuf;

/// Stability guard errors
///
/// A corrupt or missing state file is not an error: it is read as empty.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Filesystem failure on the state or lock file
    #[error("guard I/O on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// State could not be encoded
    #[error("guard state encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Tracked path resolves outside the project root
    #[error("path {0} is outside the project root")]
    OutsideRoot(PathBuf),
}

impl GuardError {
    #[inline]
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
