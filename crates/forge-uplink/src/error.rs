//! Uplink construction errors
//!
//! Per-request failures are [`forge_core::CapabilityError`]s; this type only
//! covers building a client.

/// Why an uplink could not be built
#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    /// Endpoint is not an http(s) URL
    #[error("invalid uplink endpoint {0:?}")]
    InvalidEndpoint(String),

    /// Model name is empty
    #[error("uplink model is empty")]
    MissingModel,

    /// HTTP client could not be initialized
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
