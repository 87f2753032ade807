//! Forge Guard - Stability Guard
//!
//! Tracks automated edits per file and refuses further mutation when a file
//! stops converging:
//! - **Oscillation**: new content matches one of the last five versions
//! - **Fatigue**: ten edits inside a rolling 24 hour window
//!
//! Locked files unlock on their own after a one hour cooldown. State lives in
//! `<root>/.forge/stability.json` and every operation re-reads it under an
//! exclusive advisory lock, so separate processes observe each other.
//!
//! The guard also hands out an in-flight lease per file, making "at most one
//! pipeline per file" hold across processes.

pub mod clock;
pub mod error;
pub mod guard;
pub mod record;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::GuardError;
pub use guard::{Acquire, StabilityGuard};
pub use record::{FileStabilityRecord, FileStatus, GuardConfig, Lease, LockReason};

/// BLAKE3 hex digest used for oscillation detection
#[inline]
#[must_use]
pub fn content_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
