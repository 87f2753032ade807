//! Error types for the sandbox
//!
//! Non-zero exits, timeouts and runtime outages are not errors: they are
//! reported through [`crate::SandboxReport`]. Only failing to start the
//! native shell at all surfaces here.

/// Sandbox errors
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The process could not be spawned
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the process failed
    #[error("sandbox I/O: {0}")]
    Io(#[from] std::io::Error),
}
