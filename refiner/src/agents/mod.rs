//! Generation capabilities driven by the refinement loop.
//!
//! The [`GenerationAgent`] trait decouples the orchestrator from the model
//! backend. Tests use scripted agents that return predetermined artifacts
//! without network access.

use anyhow::Result;

use crate::core::cancel::{CancellationToken, HaltResult};
use crate::core::types::{ChatMessage, Generation, GenerationTask};

pub mod chat;
pub mod test_gen;

/// Proposes and repairs candidate artifacts.
///
/// Implementations retry transient backend failures themselves and degrade
/// to a placeholder artifact instead of failing, so every call that is not
/// cancelled yields something to execute.
pub trait GenerationAgent: Send {
    /// Token the agent must honor inside its own retry loop.
    fn set_cancel_check(&mut self, token: CancellationToken);

    fn generate(&mut self, task: &GenerationTask) -> HaltResult<Generation>;

    fn refine(
        &mut self,
        artifact: &str,
        diagnostics: &str,
        task: &GenerationTask,
    ) -> HaltResult<Generation>;

    /// Closing exchange after a successful round; not a new generation.
    fn finish(&mut self) -> HaltResult<Vec<ChatMessage>>;
}

/// Builds one [`GenerationAgent`] per configured model.
pub trait AgentFactory: Send + Sync {
    fn agent_for(&self, model: &str) -> Result<Box<dyn GenerationAgent>>;
}
