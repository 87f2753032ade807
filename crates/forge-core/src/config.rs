//! Forge configuration
//!
//! Loaded from `forge.toml` in the project root (or an explicit path). Every
//! section is optional; omitted values take the defaults below.
//!
//! ```toml
//! [pipeline]
//! max_retries = 3
//! test_timeout_secs = 15
//!
//! [sprt]
//! alpha = 0.05
//! beta = 0.1
//! p0 = 0.01
//! p1 = 0.2
//!
//! [guard]
//! fatigue_limit = 10
//!
//! [sandbox]
//! runtime = "podman"
//!
//! [quality]
//! max_block_lines = 12
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use forge_guard::GuardConfig;
use forge_sandbox::SandboxConfig;
use forge_sprt::SprtParams;

use crate::error::ForgeError;
use crate::quality::QualityConfig;

/// File name looked up in the project root
pub const CONFIG_FILE: &str = "forge.toml";

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForgeConfig {
    /// Retry and timeout limits
    pub pipeline: PipelineConfig,
    /// Sequential test parameters
    pub sprt: SprtParams,
    /// Stability thresholds
    pub guard: GuardConfig,
    /// Execution isolation
    pub sandbox: SandboxConfig,
    /// Remote generation endpoint
    pub uplink: UplinkSettings,
    /// Task discovery
    pub tasks: TaskSettings,
    /// Pre-apply check of generated code
    pub quality: QualityConfig,
}

impl ForgeConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Returns [`ForgeError::Config`] on syntax or range errors.
    pub fn from_toml(text: &str) -> Result<Self, ForgeError> {
        let config: Self = toml::from_str(text).map_err(|e| ForgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file
    ///
    /// # Errors
    /// Returns [`ForgeError::Io`] if unreadable, [`ForgeError::Config`] if invalid.
    pub fn load(path: &Path) -> Result<Self, ForgeError> {
        let text = std::fs::read_to_string(path).map_err(|e| ForgeError::io(path, e))?;
        Self::from_toml(&text).map_err(|e| match e {
            ForgeError::Config(msg) => ForgeError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Load `<root>/forge.toml`, or defaults when it does not exist
    ///
    /// # Errors
    /// Same as [`ForgeConfig::load`].
    pub fn discover(root: &Path) -> Result<Self, ForgeError> {
        let path = root.join(CONFIG_FILE);
        if path.is_file() {
            tracing::debug!(path = %path.display(), "loading configuration");
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check ranges
    ///
    /// # Errors
    /// Returns [`ForgeError::Config`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ForgeError> {
        self.sprt
            .validate()
            .map_err(|e| ForgeError::Config(format!("sprt: {e}")))?;
        self.pipeline.validate()?;
        self.quality.validate()?;
        if self.guard.fatigue_limit == 0 {
            return Err(ForgeError::Config("guard.fatigue_limit must be at least 1".into()));
        }
        if self.guard.history_len == 0 {
            return Err(ForgeError::Config("guard.history_len must be at least 1".into()));
        }
        if self.sandbox.runtime.trim().is_empty() {
            return Err(ForgeError::Config("sandbox.runtime is empty".into()));
        }
        Ok(())
    }

    /// With pipeline limits
    #[inline]
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// With SPRT parameters
    #[inline]
    #[must_use]
    pub fn with_sprt(mut self, sprt: SprtParams) -> Self {
        self.sprt = sprt;
        self
    }

    /// With guard thresholds
    #[inline]
    #[must_use]
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    /// With sandbox settings
    #[inline]
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// With quality thresholds
    #[inline]
    #[must_use]
    pub fn with_quality(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }
}

/// Retry and timeout limits of one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Attempts per task
    pub max_retries: u32,
    /// Verification infrastructure failures tolerated per attempt
    pub max_strikes: u32,
    /// Hard deadline of the generated test command
    pub test_timeout_secs: u64,
    /// Deadline of the generated lint command
    pub lint_timeout_secs: u64,
    /// Deadline of each generation call
    pub generation_timeout_secs: u64,
    /// Trials the test program must report
    pub min_trials: usize,
    /// Characters of execution log fed back after a rejection
    pub log_tail_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_strikes: 2,
            test_timeout_secs: 15,
            lint_timeout_secs: 60,
            generation_timeout_secs: 120,
            min_trials: 25,
            log_tail_chars: 2_000,
        }
    }
}

impl PipelineConfig {
    /// With retry limit
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// With test deadline
    #[inline]
    #[must_use]
    pub fn with_test_timeout_secs(mut self, secs: u64) -> Self {
        self.test_timeout_secs = secs;
        self
    }

    /// With generation deadline
    #[inline]
    #[must_use]
    pub fn with_generation_timeout_secs(mut self, secs: u64) -> Self {
        self.generation_timeout_secs = secs;
        self
    }

    /// With minimum trial count
    #[inline]
    #[must_use]
    pub fn with_min_trials(mut self, trials: usize) -> Self {
        self.min_trials = trials;
        self
    }

    pub(crate) fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub(crate) fn lint_timeout(&self) -> Duration {
        Duration::from_secs(self.lint_timeout_secs)
    }

    pub(crate) fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    fn validate(&self) -> Result<(), ForgeError> {
        let checks: [(&str, bool); 5] = [
            ("pipeline.max_retries", self.max_retries >= 1),
            ("pipeline.max_strikes", self.max_strikes >= 1),
            ("pipeline.test_timeout_secs", self.test_timeout_secs >= 1),
            ("pipeline.lint_timeout_secs", self.lint_timeout_secs >= 1),
            (
                "pipeline.generation_timeout_secs",
                self.generation_timeout_secs >= 1,
            ),
        ];
        match checks.iter().find(|(_, ok)| !ok) {
            Some((name, _)) => Err(ForgeError::Config(format!("{name} must be at least 1"))),
            None => Ok(()),
        }
    }
}

/// Remote chat-completion endpoint used by `forge-uplink`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UplinkSettings {
    /// Chat completions URL
    pub endpoint: String,
    /// Model name sent with every request
    pub model: String,
    /// Environment variable holding the bearer token
    pub api_key_env: String,
    /// Per-request HTTP timeout
    pub timeout_secs: u64,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for UplinkSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "FORGE_API_KEY".to_string(),
            timeout_secs: 120,
            temperature: 0.2,
        }
    }
}

/// Where tasks come from when none is given explicitly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskSettings {
    /// Backlog file, relative to the project root
    pub backlog: PathBuf,
    /// Scan the tree for quality breaches before reading the backlog
    pub scan_breaches: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            backlog: PathBuf::from(".forge/BACKLOG.md"),
            scan_breaches: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = ForgeConfig::from_toml("").unwrap();
        assert_eq!(config, ForgeConfig::default());
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.pipeline.test_timeout_secs, 15);
        assert_eq!(config.pipeline.min_trials, 25);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = ForgeConfig::from_toml(
            "[pipeline]\nmax_retries = 5\n\n[sandbox]\nruntime = \"podman\"\n",
        )
        .unwrap();
        assert_eq!(config.pipeline.max_retries, 5);
        assert_eq!(config.pipeline.max_strikes, 2);
        assert_eq!(config.sandbox.runtime, "podman");
        assert_eq!(config.sandbox.image, SandboxConfig::default().image);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ForgeConfig::from_toml("[pipeline]\nmax_retry = 5\n").unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let err = ForgeConfig::from_toml("[pipeline]\nmax_retries = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_retries"));

        let err = ForgeConfig::from_toml(
            "[sprt]\nalpha = 0.05\nbeta = 0.1\np0 = 0.3\np1 = 0.2\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("sprt"));
    }

    #[test]
    fn quality_section() {
        let config = ForgeConfig::from_toml("[quality]\nenabled = false\n").unwrap();
        assert!(!config.quality.enabled);
        assert_eq!(config.quality.max_block_lines, 12);

        let err = ForgeConfig::from_toml("[quality]\nmin_order_measure = 2.0\n").unwrap_err();
        assert!(err.to_string().contains("min_order_measure"));
    }

    #[test]
    fn discover_without_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ForgeConfig::discover(dir.path()).unwrap(), ForgeConfig::default());

        std::fs::write(dir.path().join(CONFIG_FILE), "[guard]\nfatigue_limit = 4\n").unwrap();
        assert_eq!(ForgeConfig::discover(dir.path()).unwrap().guard.fatigue_limit, 4);
    }
}
