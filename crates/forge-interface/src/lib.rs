//! Forge Interface - blinded interface summaries
//!
//! The adversarial test author only sees what the generated code promises,
//! never how it does it. [`summarize`] turns a source file into its
//! top-level signatures plus documentation using tree-sitter; anything it
//! cannot parse cleanly is passed through whole.
//!
//! # Example
//!
//! ```rust
//! use std::path::Path;
//! use forge_interface::summarize;
//!
//! let summary = summarize(Path::new("math.py"), "def add(a, b):\n    \"\"\"Sum.\"\"\"\n    return a + b\n");
//! assert!(!summary.is_fallback());
//! assert!(!summary.render().contains("return a + b"));
//! ```

#![allow(missing_docs)]

pub mod error;
pub mod extract;
pub mod language;
pub mod summary;

pub use error::ExtractError;
pub use extract::{declarations, DeclKind, Declaration};
pub use language::Language;
pub use summary::{summarize, InterfaceSummary};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
