//! Forge Core - verified code mutation
//!
//! The [`Orchestrator`] takes a [`MutationTask`], asks a [`CodeGenerator`]
//! for new content, writes it under a backup, has a [`TestGenerator`] attack
//! the blinded interface inside the sandbox, and keeps the change only when a
//! sequential probability ratio test accepts the observed trials.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use forge_core::prelude::*;
//!
//! # async fn example(
//! #     generator: Arc<dyn CodeGenerator>,
//! #     tester: Arc<dyn TestGenerator>,
//! # ) -> Result<(), ForgeError> {
//! let forge = Orchestrator::builder(".")
//!     .generator(generator)
//!     .test_generator(tester)
//!     .build()?;
//!
//! let task = MutationTask::new("src/math.py", "add a function add(a, b)");
//! let commit = forge.run(task, &EventSink::discard(), &CancelToken::new()).await?;
//! println!("committed on attempt {}", commit.attempt);
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod journal;
pub mod orchestrator;
pub mod prompt;
pub mod quality;
pub mod session;
pub mod state_machine;
pub mod tasks;
pub mod types;

pub use capability::{CodeGenerator, GenerationRequest, TestGenerator, TestPlan, TestRequest};
pub use config::{ForgeConfig, PipelineConfig, TaskSettings, UplinkSettings};
pub use error::{CapabilityError, ForgeError, PlanError};
pub use events::{EventSink, ProgressEvent};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, PipelineHandle};
pub use quality::QualityConfig;
pub use state_machine::Phase;
pub use tasks::{BacklogFile, BreachScanner, PrioritizedSource, TaskSource};
pub use types::{
    Commit, MutationTask, Outcome, OutcomeStatus, SessionId, Severity, TaskId, TaskOrigin,
};

// Collaborator crates, so front ends need only this one
pub use forge_guard as guard;
pub use forge_sandbox as sandbox;
pub use forge_sprt as sprt;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::capability::{CodeGenerator, TestGenerator};
    pub use crate::error::{CapabilityError, ForgeError};
    pub use crate::events::{EventSink, ProgressEvent};
    pub use crate::orchestrator::Orchestrator;
    pub use crate::types::{Commit, MutationTask, Outcome};
    pub use forge_sandbox::CancelToken;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
