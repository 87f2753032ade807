//! Task sources
//!
//! - [`BacklogFile`]: Markdown plan, table rows or checklist items
//! - [`BreachScanner`]: code-quality breaches found in the tree
//! - [`PrioritizedSource`]: several sources, first non-empty wins

mod backlog;
mod scanner;

pub use backlog::BacklogFile;
pub use scanner::BreachScanner;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ForgeError;
use crate::types::MutationTask;

/// Supplies mutation tasks and records their completion
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// First open task, if any
    async fn next_task(&self) -> Result<Option<MutationTask>, ForgeError>;

    /// Mark `task` done. Returns `false` when there was nothing to mark,
    /// including tasks this source did not produce.
    async fn mark_complete(&self, task: &MutationTask) -> Result<bool, ForgeError>;
}

/// Asks each source in order
#[derive(Clone, Default)]
pub struct PrioritizedSource {
    sources: Vec<Arc<dyn TaskSource>>,
}

impl PrioritizedSource {
    /// No sources; yields nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lower-priority source
    #[must_use]
    pub fn then(mut self, source: Arc<dyn TaskSource>) -> Self {
        self.sources.push(source);
        self
    }
}

impl std::fmt::Debug for PrioritizedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrioritizedSource")
            .field("sources", &self.sources.len())
            .finish()
    }
}

#[async_trait]
impl TaskSource for PrioritizedSource {
    async fn next_task(&self) -> Result<Option<MutationTask>, ForgeError> {
        for source in &self.sources {
            if let Some(task) = source.next_task().await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    async fn mark_complete(&self, task: &MutationTask) -> Result<bool, ForgeError> {
        let mut marked = false;
        for source in &self.sources {
            marked |= source.mark_complete(task).await?;
        }
        Ok(marked)
    }
}
