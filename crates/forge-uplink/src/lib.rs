//! Forge Uplink - remote generation capabilities
//!
//! Implements [`CodeGenerator`](forge_core::CodeGenerator) and
//! [`TestGenerator`](forge_core::TestGenerator) over any OpenAI-compatible
//! chat completions endpoint. Transient failures (429, 5xx, transport) are
//! retried with exponential backoff; everything else surfaces as a
//! [`CapabilityError`](forge_core::CapabilityError) for the orchestrator to
//! count against the attempt.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use forge_core::{ForgeConfig, Orchestrator};
//! use forge_uplink::Uplink;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ForgeConfig::discover(std::path::Path::new("."))?;
//! let uplink = Arc::new(Uplink::from_env(&config.uplink)?);
//! let forge = Orchestrator::builder(".")
//!     .config(config)
//!     .generator(uplink.clone())
//!     .test_generator(uplink)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod capabilities;
pub mod client;
pub mod error;
pub mod prompts;
pub mod wire;

pub use client::{ChatClient, RetryPolicy};
pub use error::UplinkError;

use forge_core::UplinkSettings;

/// Both generation capabilities over one chat endpoint
#[derive(Debug, Clone)]
pub struct Uplink {
    client: ChatClient,
}

impl Uplink {
    /// Wrap an existing client
    #[must_use]
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    /// Build from settings, reading the bearer token from `api_key_env`.
    ///
    /// A missing token is not an error: local endpoints often need none.
    ///
    /// # Errors
    /// Returns [`UplinkError`] when the settings are unusable.
    pub fn from_env(settings: &UplinkSettings) -> Result<Self, UplinkError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                var = %settings.api_key_env,
                "no API key in environment, sending unauthenticated requests"
            );
        }
        Ok(Self::new(ChatClient::new(settings, api_key)?))
    }

    /// Underlying chat client
    #[must_use]
    pub fn client(&self) -> &ChatClient {
        &self.client
    }
}
