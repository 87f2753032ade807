//! Forge Sandbox - Isolated Execution Service
//!
//! Runs generated lint and test commands against a project tree:
//! - Preferred: an ephemeral container, no network, 128 MiB, half a CPU,
//!   project mounted read-only, only the session scratch dir writable
//! - Degraded: a plain `sh -c` subprocess with a cleared environment, used
//!   when the container runtime is missing or fails mid-session. Reports
//!   from this path carry `simulated = true`.
//!
//! Every container started is force-removed on every exit path: success,
//! failure, timeout, cancellation, or the future being dropped.

pub mod cancel;
pub mod config;
pub mod error;
mod process;
pub mod report;
pub mod sandbox;

pub use cancel::CancelToken;
pub use config::SandboxConfig;
pub use error::SandboxError;
pub use report::{tail, SandboxReport};
pub use sandbox::{ExecRequest, Mode, Sandbox, DEFAULT_TIMEOUT};

/// Container name prefix; the suffix is 8 random hex digits
pub const CONTAINER_PREFIX: &str = "forge_sandbox_";
/// Network mode passed to the runtime
pub const NETWORK_MODE: &str = "none";
/// Memory cap passed to the runtime
pub const MEMORY_LIMIT: &str = "128m";
/// CPU cap passed to the runtime
pub const CPU_LIMIT: &str = "0.5";
/// Mount point of the project inside the container
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
