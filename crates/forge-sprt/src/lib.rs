//! Forge SPRT - Sequential Validator
//!
//! Wald's sequential probability ratio test over binary trial outcomes:
//! - H0: the failure rate is at most `p0` (the mutation is sound)
//! - H1: the failure rate is at least `p1` (the mutation is flaky or regressive)
//!
//! The validator is pure arithmetic. A fresh [`SequentialValidator`] is built
//! for every verification pass; nothing is shared between passes.
//!
//! # Example
//!
//! ```rust
//! use forge_sprt::{Decision, SequentialValidator, SprtParams, Trial};
//!
//! let mut validator = SequentialValidator::new(SprtParams::default());
//! let verdict = validator.evaluate(&[Trial::Pass; 25]);
//! assert_eq!(verdict.decision, Decision::Accept);
//! ```

pub mod error;
pub mod params;
pub mod validator;

pub use error::SprtError;
pub use params::SprtParams;
pub use validator::{Decision, SequentialValidator, Trial, Verdict};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
