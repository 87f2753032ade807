//! Task, session and outcome types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

use forge_sprt::Verdict;

/// Task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Ulid);

impl TaskId {
    /// Fresh, time-ordered id
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-attempt session, namespacing every temporary artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Fresh random session
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Eight hex characters, used in file names
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.short())
    }
}

/// Task urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic or documentation
    Low,
    /// Default for submitted tasks
    #[default]
    Medium,
    /// Should be handled next
    High,
    /// Blocks other work
    Critical,
}

/// Where a task came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOrigin {
    /// Submitted directly
    Manual,
    /// Entry in the backlog file
    Backlog {
        /// Zero-based line index at the time it was read
        line: usize,
        /// Raw line, used to relocate the entry if the file moved
        raw: String,
    },
    /// Detected code-quality breach
    QualityBreach {
        /// Rule that fired
        rule: String,
    },
}

/// One unit of work: mutate `target` to satisfy `description`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationTask {
    /// Unique id
    pub id: TaskId,
    /// Target file, relative to the project root or absolute inside it
    pub target: PathBuf,
    /// What the change should achieve
    pub description: String,
    /// Where the task came from
    pub origin: TaskOrigin,
    /// Urgency
    pub severity: Severity,
}

impl MutationTask {
    /// Manually submitted task
    pub fn new(target: impl Into<PathBuf>, description: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            target: target.into(),
            description: description.into(),
            origin: TaskOrigin::Manual,
            severity: Severity::default(),
        }
    }

    /// With origin
    #[must_use]
    pub fn with_origin(mut self, origin: TaskOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// With severity
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Successful pipeline result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    /// Task that produced the change
    pub task: TaskId,
    /// Target, relative to the project root
    pub target: PathBuf,
    /// Attempt that was accepted (1-based)
    pub attempt: u32,
    /// Session of the accepted attempt
    pub session: SessionId,
    /// Accepting verdict
    pub verdict: Verdict,
    /// Verification ran without container isolation
    pub simulated: bool,
    /// File is still editable after this commit
    pub stable: bool,
}

/// Final status reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Committed, or nothing to do
    Success,
    /// Attempts exhausted
    Failure,
    /// Locked, cancelled or broken
    Error,
}

/// Final event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Overall result
    pub status: OutcomeStatus,
    /// Human-readable summary
    pub detail: String,
}

impl Outcome {
    /// Success with `detail`
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            detail: detail.into(),
        }
    }

    /// Failure with `detail`
    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            detail: detail.into(),
        }
    }

    /// Error with `detail`
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_short_is_eight_hex() {
        let sid = SessionId::new();
        let short = sid.short();
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sid.to_string(), short);
    }

    #[test]
    fn task_ids_are_ordered_by_creation() {
        let a = TaskId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = TaskId::new();
        assert!(a < b);
    }

    #[test]
    fn outcome_serializes_lowercase() {
        let json = serde_json::to_string(&Outcome::failure("x")).unwrap();
        assert_eq!(json, r#"{"status":"failure","detail":"x"}"#);
    }

    #[test]
    fn origin_is_tagged() {
        let json = serde_json::to_value(TaskOrigin::QualityBreach {
            rule: "missing-docstring".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "quality_breach");
    }
}
