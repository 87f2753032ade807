//! Per-file stability record and its transition rules
//!
//! Records are plain data; [`crate::StabilityGuard`] loads, mutates and
//! persists them under the state lock.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Thresholds of the guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    /// Seconds a locked file stays locked after its last edit
    pub cooldown_secs: u64,
    /// Rolling window for the edit counter, in seconds
    pub window_secs: u64,
    /// Edits inside the window that lock the file
    pub fatigue_limit: u32,
    /// Content hashes remembered for oscillation detection
    pub history_len: usize,
    /// Seconds after which an unreleased lease is considered abandoned
    pub lease_ttl_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3_600,
            window_secs: 86_400,
            fatigue_limit: 10,
            history_len: 5,
            lease_ttl_secs: 3_600,
        }
    }
}

impl GuardConfig {
    /// Create with defaults
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cooldown
    #[inline]
    #[must_use]
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Set the fatigue limit
    #[inline]
    #[must_use]
    pub fn with_fatigue_limit(mut self, limit: u32) -> Self {
        self.fatigue_limit = limit;
        self
    }

    /// Set the lease TTL
    #[inline]
    #[must_use]
    pub fn with_lease_ttl_secs(mut self, secs: u64) -> Self {
        self.lease_ttl_secs = secs;
        self
    }

    pub(crate) fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }

    pub(crate) fn window(&self) -> Duration {
        secs(self.window_secs)
    }

    pub(crate) fn lease_ttl(&self) -> Duration {
        secs(self.lease_ttl_secs)
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

/// Whether automated mutation is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileStatus {
    /// Mutation allowed
    #[default]
    Active,
    /// Mutation refused until the cooldown elapses
    Locked,
}

/// Why a file was locked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    /// Content matched a recent version
    Oscillation,
    /// Too many edits in the window
    Fatigue,
}

impl LockReason {
    /// Label used in logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Oscillation => "oscillation",
            Self::Fatigue => "fatigue",
        }
    }
}

/// In-flight pipeline holding a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Session identifier of the holder
    pub session: String,
    /// When the lease was taken
    pub acquired_at: DateTime<Utc>,
}

/// Persisted history of one file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStabilityRecord {
    /// Lock state
    pub status: FileStatus,
    /// Edits counted in the current window
    pub edit_count_24h: u32,
    /// Time of the last recorded edit
    pub last_edited_at: Option<DateTime<Utc>>,
    /// Hashes of the most recent versions, oldest first
    pub recent_hashes: VecDeque<String>,
    /// Current holder, if a pipeline is running on the file
    pub lease: Option<Lease>,
}

impl FileStabilityRecord {
    /// Unlock if the cooldown has elapsed. Returns true if the record changed.
    pub(crate) fn refresh(&mut self, now: DateTime<Utc>, config: &GuardConfig) -> bool {
        if self.status != FileStatus::Locked {
            return false;
        }
        let cooled = self
            .last_edited_at
            .map_or(true, |at| now - at >= config.cooldown());
        if cooled {
            self.status = FileStatus::Active;
            self.edit_count_24h = 0;
        }
        cooled
    }

    /// Whether the record is locked at `now`, ignoring pending refreshes
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.status == FileStatus::Locked
    }

    /// Time at which a locked record unlocks
    #[must_use]
    pub fn unlocks_at(&self, config: &GuardConfig) -> Option<DateTime<Utc>> {
        if !self.is_locked() {
            return None;
        }
        self.last_edited_at.map(|at| at + config.cooldown())
    }

    /// Apply one edit. Returns the lock reason if this edit locked the file.
    pub(crate) fn apply_edit(
        &mut self,
        hash: String,
        now: DateTime<Utc>,
        config: &GuardConfig,
    ) -> Option<LockReason> {
        self.refresh(now, config);

        if self
            .last_edited_at
            .is_some_and(|at| now - at > config.window())
        {
            self.edit_count_24h = 0;
        }
        self.edit_count_24h = self.edit_count_24h.saturating_add(1);
        self.last_edited_at = Some(now);

        let echo = self.recent_hashes.contains(&hash);
        self.recent_hashes.push_back(hash);
        while self.recent_hashes.len() > config.history_len {
            self.recent_hashes.pop_front();
        }

        let reason = if echo {
            Some(LockReason::Oscillation)
        } else if self.edit_count_24h >= config.fatigue_limit {
            Some(LockReason::Fatigue)
        } else {
            None
        };
        if reason.is_some() {
            self.status = FileStatus::Locked;
        }
        reason
    }

    /// Whether a live lease is held by someone other than `session`
    pub(crate) fn foreign_lease(
        &self,
        session: &str,
        now: DateTime<Utc>,
        config: &GuardConfig,
    ) -> Option<&Lease> {
        self.lease
            .as_ref()
            .filter(|l| l.session != session && now - l.acquired_at < config.lease_ttl())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000)
    }

    #[test]
    fn history_is_bounded() {
        let config = GuardConfig::default();
        let mut rec = FileStabilityRecord::default();
        for i in 0..8 {
            rec.apply_edit(format!("h{i}"), t0(), &config);
            rec.status = FileStatus::Active;
        }
        assert_eq!(rec.recent_hashes.len(), 5);
        assert_eq!(rec.recent_hashes.front().map(String::as_str), Some("h3"));
    }

    #[test]
    fn window_resets_counter() {
        let config = GuardConfig::default();
        let mut rec = FileStabilityRecord::default();
        rec.apply_edit("a".into(), t0(), &config);
        rec.apply_edit("b".into(), t0(), &config);
        assert_eq!(rec.edit_count_24h, 2);
        rec.apply_edit("c".into(), t0() + Duration::hours(25), &config);
        assert_eq!(rec.edit_count_24h, 1);
    }

    #[test]
    fn stale_lease_is_ignored() {
        let config = GuardConfig::default();
        let rec = FileStabilityRecord {
            lease: Some(Lease {
                session: "other".into(),
                acquired_at: t0(),
            }),
            ..Default::default()
        };
        assert!(rec.foreign_lease("me", t0(), &config).is_some());
        assert!(rec.foreign_lease("other", t0(), &config).is_none());
        assert!(rec
            .foreign_lease("me", t0() + Duration::hours(2), &config)
            .is_none());
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&FileStatus::Locked).unwrap_or_default();
        assert_eq!(json, "\"LOCKED\"");
    }
}
