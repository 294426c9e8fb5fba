//! One session's query: reference lookup followed by a refinement loop per
//! configured model.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::agents::AgentFactory;
use crate::agents::test_gen::ChatAgentFactory;
use crate::core::cancel::HaltResult;
use crate::core::target::TestTarget;
use crate::core::types::{ChatMessage, GenerationTask, QueryData, TestStatus};
use crate::dispatch::QueryRunner;
use crate::io::config::RefinerConfig;
use crate::io::executor::{MavenExecutor, TestExecutor};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::session::Session;

/// Material retrieved for a focal method ahead of generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    /// Existing test for a similar focal method.
    pub test_case: Option<String>,
    /// Project facts the generated test should reflect.
    pub facts: Vec<String>,
    /// Richer declaring-class context than the request carries.
    pub focal_context: Option<String>,
}

/// Looks up referable tests and facts for a focal method.
pub trait ReferenceSource: Send + Sync {
    fn lookup(&self, query: &QueryData, target: &TestTarget) -> Result<References>;
}

/// Source that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReferences;

impl ReferenceSource for NoReferences {
    fn lookup(&self, _query: &QueryData, _target: &TestTarget) -> Result<References> {
        Ok(References::default())
    }
}

/// Result of running every configured model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Model that produced `artifact` (the last one run).
    pub model: String,
    pub artifact: String,
    pub status: TestStatus,
    /// Full log across models, including the `### Model:` markers.
    pub messages: Vec<ChatMessage>,
}

pub struct Pipeline {
    models: Vec<String>,
    orchestrator: OrchestratorConfig,
    agents: Arc<dyn AgentFactory>,
    executor: Arc<dyn TestExecutor>,
    references: Arc<dyn ReferenceSource>,
}

impl Pipeline {
    pub fn new(
        models: Vec<String>,
        orchestrator: OrchestratorConfig,
        agents: Arc<dyn AgentFactory>,
        executor: Arc<dyn TestExecutor>,
    ) -> Self {
        Self {
            models,
            orchestrator,
            agents,
            executor,
            references: Arc::new(NoReferences),
        }
    }

    /// Chat-model agents and the build-tool executor described by `config`.
    pub fn from_config(config: &RefinerConfig) -> Result<Self> {
        Ok(Self::new(
            config.models.clone(),
            OrchestratorConfig::from(config),
            Arc::new(ChatAgentFactory::new(config.clone())?),
            Arc::new(MavenExecutor::new(config.executor.clone())),
        ))
    }

    pub fn with_references(mut self, references: Arc<dyn ReferenceSource>) -> Self {
        self.references = references;
        self
    }

    pub fn run(&self, session: &Session) -> HaltResult<QueryOutcome> {
        let query = session.query();
        let target = TestTarget::derive(
            &query.project_path,
            &query.focal_file_path,
            &query.target_focal_method,
        );
        debug!(
            session_id = %session.id(),
            test_path = %target.test_path,
            focal = %target.focal_method_key,
            "derived test target"
        );

        session.checkpoint()?;
        let references = self.references.lookup(query, &target)?;
        if references.test_case.is_none() {
            info!(session_id = %session.id(), "no referable test found");
            session.write_no_reference_message()?;
        }
        let task = GenerationTask {
            focal_method: query.target_focal_method.clone(),
            focal_context: references
                .focal_context
                .unwrap_or_else(|| query.target_focal_file.clone()),
            test_class: target.test_class.clone(),
            test_desc: query.test_desc.clone(),
            referable_test: references.test_case,
            facts: references.facts,
            junit_version: session.junit_version(),
        };

        let mut log: Vec<ChatMessage> = Vec::new();
        let mut outcome = None;
        for model in &self.models {
            session.checkpoint()?;
            info!(session_id = %session.id(), model = %model, "running model");
            log.push(ChatMessage::system(format!("### Model: {model}")));

            let mut agent = self.agents.agent_for(model)?;
            let refinement = Orchestrator::new(self.orchestrator, session)
                .with_prefix(log.clone())
                .run(agent.as_mut(), self.executor.as_ref(), &task, &target)?;
            info!(
                session_id = %session.id(),
                model = %model,
                status = ?refinement.status,
                "model finished"
            );

            log.extend(refinement.messages);
            outcome = Some((model.clone(), refinement.artifact, refinement.status));
        }

        let (model, artifact, status) =
            outcome.ok_or_else(|| anyhow::anyhow!("no models configured"))?;
        Ok(QueryOutcome {
            model,
            artifact,
            status,
            messages: log,
        })
    }
}

impl QueryRunner for Pipeline {
    fn run(&self, session: &Session) -> HaltResult<()> {
        Pipeline::run(self, session).map(|_| ())
    }
}
