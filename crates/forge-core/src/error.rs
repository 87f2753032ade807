//! Error types for Forge Core
//!
//! Only terminal conditions surface as [`ForgeError`]:
//! - retry exhaustion
//! - lock contention
//! - cancellation
//! - unrecoverable I/O
//!
//! Generation failures, strikes and statistical rejections are absorbed by
//! the retry loop and fed back as context.

use std::path::PathBuf;
use std::time::Duration;

use forge_guard::GuardError;

use crate::state_machine::Phase;

/// Main Forge error type
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// File is locked by the stability guard or held by another pipeline
    #[error("file locked: {path}{}", holder.as_ref().map(|h| format!(" (in flight: {h})")).unwrap_or_default())]
    FileLocked {
        /// Target file
        path: PathBuf,
        /// Session holding the file, if locked by a live pipeline
        holder: Option<String>,
    },

    /// Every attempt failed
    #[error("retries exhausted after {attempts} attempts on {path}: {last_error}")]
    Exhausted {
        /// Target file
        path: PathBuf,
        /// Attempts made
        attempts: u32,
        /// Context of the final failure
        last_error: String,
    },

    /// Cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Target or artifact path escapes the project root
    #[error("path {0} is outside the project root")]
    OutsideRoot(PathBuf),

    /// Filesystem failure that cannot be retried
    #[error("I/O on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Stability guard failure
    #[error("stability guard: {0}")]
    Guard(#[from] GuardError),

    /// Task source failure
    #[error("task source: {0}")]
    TaskSource(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// State machine misuse
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current phase
        from: Phase,
        /// Requested phase
        to: Phase,
    },

    /// Background task panicked or was aborted
    #[error("background task failed: {0}")]
    Join(String),
}

impl ForgeError {
    #[inline]
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the file was left untouched because it was locked
    #[inline]
    #[must_use]
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::FileLocked { .. })
    }

    /// Process exit code for command-line front ends
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exhausted { .. } => 1,
            Self::FileLocked { .. } => 3,
            _ => 2,
        }
    }
}

/// Failure of a generation capability
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// No reply within the deadline
    #[error("capability timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote rejected the request
    #[error("remote returned status {status}: {body}")]
    Status {
        /// HTTP status
        status: u16,
        /// Response body excerpt
        body: String,
    },

    /// Reply could not be decoded
    #[error("undecodable reply: {0}")]
    Decode(String),

    /// Reply was empty
    #[error("empty reply")]
    Empty,
}

impl CapabilityError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) | Self::Empty => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Why a test plan was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Shape does not match the schema
    #[error("malformed test plan: {0}")]
    Malformed(String),

    /// A required field is empty
    #[error("test plan field {0} is empty")]
    EmptyField(&'static str),

    /// Test file path is absolute, escapes the root, or targets a protected file
    #[error("unsafe test file path {path}: {reason}")]
    UnsafePath {
        /// Offending path
        path: String,
        /// Violation
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let locked = ForgeError::FileLocked {
            path: "a.py".into(),
            holder: None,
        };
        assert_eq!(locked.exit_code(), 3);
        assert!(locked.is_lock_contention());
        assert_eq!(locked.to_string(), "file locked: a.py");

        let busy = ForgeError::FileLocked {
            path: "a.py".into(),
            holder: Some("abc".into()),
        };
        assert_eq!(busy.to_string(), "file locked: a.py (in flight: abc)");

        let exhausted = ForgeError::Exhausted {
            path: "a.py".into(),
            attempts: 3,
            last_error: "rejected".into(),
        };
        assert_eq!(exhausted.exit_code(), 1);
        assert_eq!(ForgeError::Cancelled.exit_code(), 2);
    }

    #[test]
    fn retryable_capability_errors() {
        assert!(CapabilityError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(CapabilityError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!CapabilityError::Status {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!CapabilityError::Decode("x".into()).is_retryable());
    }
}
