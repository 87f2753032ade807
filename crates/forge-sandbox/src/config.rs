//! Sandbox configuration
//!
//! Only the runtime binary and image are configurable; isolation flags are
//! constants of the crate.

use serde::{Deserialize, Serialize};

/// Sandbox settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Container runtime CLI (`docker`, `podman`, or a path)
    pub runtime: String,
    /// Image the commands run in
    pub image: String,
    /// Try the container path at all
    pub prefer_container: bool,
    /// Seconds allowed for the startup `info` check
    pub info_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "python:3.14-alpine".to_string(),
            prefer_container: true,
            info_timeout_secs: 10,
        }
    }
}

impl SandboxConfig {
    /// Create with defaults
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runtime binary
    #[inline]
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Set the image
    #[inline]
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Skip containers entirely
    #[inline]
    #[must_use]
    pub fn native_only(mut self) -> Self {
        self.prefer_container = false;
        self
    }
}
