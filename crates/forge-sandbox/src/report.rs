//! Outcome of one sandboxed command

use serde::{Deserialize, Serialize};

/// Captured result of a sandbox run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SandboxReport {
    /// Standard output (partial if the command was killed)
    pub stdout: String,
    /// Standard error (partial if the command was killed)
    pub stderr: String,
    /// Exit code; `None` if killed or terminated by a signal
    pub exit_code: Option<i32>,
    /// Killed at the deadline
    pub timed_out: bool,
    /// Killed by cancellation
    pub cancelled: bool,
    /// Ran natively instead of in a container
    pub simulated: bool,
    /// Container name, if one was started
    pub container: Option<String>,
    /// Wall time in milliseconds
    pub elapsed_ms: u64,
}

impl SandboxReport {
    /// Exited zero within the deadline
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.cancelled
    }

    /// stdout and stderr together, stderr labelled
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\nSTDERR:\n{}", self.stdout, self.stderr)
        }
    }
}

/// Last `max_chars` characters of `text`, on a char boundary
#[must_use]
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let start = text.char_indices().nth(skip).map_or(text.len(), |(i, _)| i);
    &text[start..]
}
