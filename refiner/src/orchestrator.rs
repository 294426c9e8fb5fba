//! Generate, execute, refine: the per-model test refinement loop.
//!
//! One [`Orchestrator`] drives one GenerationAgent for one session. The loop
//! checks the session's cancellation token before and after every blocking
//! capability call and streams the exchange log after every generation.

use tracing::{debug, info};

use crate::agents::GenerationAgent;
use crate::core::cancel::HaltResult;
use crate::core::classifier::classify_report;
use crate::core::target::TestTarget;
use crate::core::types::{ChatMessage, GenerationAttempt, GenerationTask, TestStatus};
use crate::io::config::RefinerConfig;
use crate::io::executor::TestExecutor;
use crate::session::Session;

/// Loop budget and diagnostic shaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Refinement rounds allowed after the initial generation.
    pub max_round: u32,
    pub diagnostic_line_cap: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_round: 3,
            diagnostic_line_cap: 20,
        }
    }
}

impl From<&RefinerConfig> for OrchestratorConfig {
    fn from(config: &RefinerConfig) -> Self {
        Self {
            max_round: config.max_round,
            diagnostic_line_cap: config.diagnostic_line_cap,
        }
    }
}

/// Final artifact of a completed (not cancelled) loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refinement {
    pub artifact: String,
    /// `Success`, or the last failing status once the budget ran out.
    pub status: TestStatus,
    /// Exchanges produced by this loop, without the prefix.
    pub messages: Vec<ChatMessage>,
}

pub struct Orchestrator<'a> {
    config: OrchestratorConfig,
    session: &'a Session,
    prefix: Vec<ChatMessage>,
    messages: Vec<ChatMessage>,
    attempts: Vec<GenerationAttempt>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: OrchestratorConfig, session: &'a Session) -> Self {
        Self {
            config,
            session,
            prefix: Vec::new(),
            messages: Vec::new(),
            attempts: Vec::new(),
        }
    }

    /// Messages published ahead of this loop's own exchanges on every update.
    pub fn with_prefix(mut self, prefix: Vec<ChatMessage>) -> Self {
        self.prefix = prefix;
        self
    }

    /// Rounds completed so far, in order. Survives cancellation.
    pub fn attempts(&self) -> &[GenerationAttempt] {
        &self.attempts
    }

    /// Exchanges streamed so far. Survives cancellation.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Run the loop to success, budget exhaustion or cancellation.
    pub fn run(
        &mut self,
        agent: &mut dyn GenerationAgent,
        executor: &dyn TestExecutor,
        task: &GenerationTask,
        target: &TestTarget,
    ) -> HaltResult<Refinement> {
        let session = self.session;
        agent.set_cancel_check(session.token().clone());

        session.checkpoint()?;
        let mut current = agent.generate(task)?;
        session.checkpoint()?;
        self.publish(current.exchange.clone())?;

        let mut round = 0u32;
        loop {
            session.checkpoint()?;
            let report = executor.compile_and_execute(&current.artifact, target)?;
            session.checkpoint()?;

            let verdict = classify_report(&report, self.config.diagnostic_line_cap);
            info!(session_id = %session.id(), round, status = ?verdict.status, "round classified");
            self.attempts.push(GenerationAttempt {
                round,
                prompt: current.prompt.clone(),
                response: current.response.clone(),
                artifact: current.artifact.clone(),
                status: verdict.status,
            });

            if verdict.status.is_success() {
                session.checkpoint()?;
                let closing = agent.finish()?;
                self.publish(closing)?;
                return Ok(self.refinement(current.artifact, verdict.status));
            }
            if round >= self.config.max_round {
                info!(
                    session_id = %session.id(),
                    rounds = round + 1,
                    status = ?verdict.status,
                    "refinement budget exhausted"
                );
                return Ok(self.refinement(current.artifact, verdict.status));
            }

            round += 1;
            debug!(session_id = %session.id(), round, "refining");
            session.checkpoint()?;
            let refined = agent.refine(&current.artifact, &verdict.diagnostics, task)?;
            session.checkpoint()?;
            self.publish(refined.exchange.clone())?;
            current = refined;
        }
    }

    /// Append `exchange` and stream prefix plus the whole log.
    fn publish(&mut self, exchange: Vec<ChatMessage>) -> HaltResult<()> {
        self.messages.extend(exchange);
        let mut full = self.prefix.clone();
        full.extend(self.messages.iter().cloned());
        self.session.update_messages(full)?;
        Ok(())
    }

    fn refinement(&self, artifact: String, status: TestStatus) -> Refinement {
        Refinement {
            artifact,
            status,
            messages: self.messages.clone(),
        }
    }
}
