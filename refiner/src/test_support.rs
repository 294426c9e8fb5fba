//! Test-only doubles for the session engine's capabilities.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use crate::agents::{AgentFactory, GenerationAgent};
use crate::core::cancel::{CancellationToken, Halt, HaltResult};
use crate::core::target::TestTarget;
use crate::core::types::{ChatMessage, ExecutionReport, Generation, GenerationTask, QueryData};
use crate::io::executor::TestExecutor;
use crate::session::messages::{Outbound, StatusKind};
use crate::session::writer::{ResponseWriter, WriteError};

/// Writer that keeps every line it is given.
#[derive(Default)]
pub struct RecordingWriter {
    lines: Mutex<Vec<Vec<u8>>>,
    disconnected: AtomicBool,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every later write with [`WriteError::Disconnected`].
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .expect("recording writer lock")
            .iter()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    pub fn messages(&self) -> Vec<Outbound> {
        self.lines()
            .iter()
            .map(|line| serde_json::from_str(line).expect("recorded line is an outbound message"))
            .collect()
    }

    pub fn statuses(&self) -> Vec<StatusKind> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                Outbound::Status(data) => Some(data.status),
                _ => None,
            })
            .collect()
    }

    /// Poll until a `finish` status has been written or `timeout` elapses.
    pub fn wait_for_finish(&self, timeout: Duration) -> bool {
        wait_until(timeout, || self.statuses().contains(&StatusKind::Finish))
    }
}

impl ResponseWriter for RecordingWriter {
    fn write_line(&self, line: &[u8]) -> Result<(), WriteError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(WriteError::Disconnected);
        }
        self.lines
            .lock()
            .expect("recording writer lock")
            .push(line.to_vec());
        Ok(())
    }
}

/// Poll `condition` every few milliseconds until it holds or time runs out.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn sample_query() -> QueryData {
    QueryData {
        target_focal_method: "public int add(int a, int b) {\n    return a + b;\n}".to_string(),
        target_focal_file: "package demo;\n\npublic class Calc {\n    public int add(int a, int b) {\n        return a + b;\n    }\n}".to_string(),
        test_desc: "# Objective\nAdding two numbers returns their sum.".to_string(),
        project_path: "/work/demo".to_string(),
        focal_file_path: "/work/demo/src/main/java/demo/Calc.java".to_string(),
    }
}

pub fn sample_query_json() -> serde_json::Value {
    serde_json::json!({
        "type": "query",
        "data": serde_json::to_value(sample_query()).expect("serialize query"),
    })
}

pub fn sample_target() -> TestTarget {
    let query = sample_query();
    TestTarget::derive(
        &query.project_path,
        &query.focal_file_path,
        &query.target_focal_method,
    )
}

pub fn sample_task() -> GenerationTask {
    let query = sample_query();
    GenerationTask {
        focal_method: query.target_focal_method,
        focal_context: query.target_focal_file,
        test_class: "CalcTest".to_string(),
        test_desc: query.test_desc,
        referable_test: None,
        facts: Vec::new(),
        junit_version: 4,
    }
}

pub fn passing_report() -> ExecutionReport {
    ExecutionReport {
        compile_succeeded: true,
        execute_succeeded: true,
        ..ExecutionReport::default()
    }
}

pub fn compile_failure(log: &str) -> ExecutionReport {
    ExecutionReport {
        compile_log: log.to_string(),
        ..ExecutionReport::default()
    }
}

#[derive(Default)]
struct AgentCalls {
    generate: AtomicU32,
    refine: AtomicU32,
    finish: AtomicU32,
    diagnostics: Mutex<Vec<String>>,
}

/// Agent returning queued artifacts in order.
///
/// A blocking agent never answers: it waits inside `generate` until its
/// cancellation token is set, like a slow backend honoring a stop request.
pub struct ScriptedAgent {
    artifacts: VecDeque<String>,
    blocking: bool,
    token: CancellationToken,
    calls: Arc<AgentCalls>,
}

impl ScriptedAgent {
    pub fn new<I, S>(artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            artifacts: artifacts.into_iter().map(Into::into).collect(),
            blocking: false,
            token: CancellationToken::new(),
            calls: Arc::new(AgentCalls::default()),
        }
    }

    pub fn blocking() -> Self {
        Self {
            blocking: true,
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn generate_calls(&self) -> u32 {
        self.calls.generate.load(Ordering::SeqCst)
    }

    pub fn refine_calls(&self) -> u32 {
        self.calls.refine.load(Ordering::SeqCst)
    }

    pub fn finish_calls(&self) -> u32 {
        self.calls.finish.load(Ordering::SeqCst)
    }

    /// Diagnostics passed to each `refine` call, in order.
    pub fn diagnostics_seen(&self) -> Vec<String> {
        self.calls
            .diagnostics
            .lock()
            .expect("diagnostics lock")
            .clone()
    }

    fn next(&mut self, prompt: &str) -> HaltResult<Generation> {
        if self.blocking {
            while !self.token.is_set() {
                thread::sleep(Duration::from_millis(5));
            }
            return Err(Halt::Cancelled);
        }
        let artifact = self
            .artifacts
            .pop_front()
            .unwrap_or_else(|| "class Exhausted {}".to_string());
        Ok(Generation {
            prompt: prompt.to_string(),
            response: artifact.clone(),
            exchange: vec![
                ChatMessage::user(prompt),
                ChatMessage::assistant(artifact.as_str()),
            ],
            artifact,
        })
    }
}

impl GenerationAgent for ScriptedAgent {
    fn set_cancel_check(&mut self, token: CancellationToken) {
        self.token = token;
    }

    fn generate(&mut self, _task: &GenerationTask) -> HaltResult<Generation> {
        self.calls.generate.fetch_add(1, Ordering::SeqCst);
        self.next("generate")
    }

    fn refine(
        &mut self,
        _artifact: &str,
        diagnostics: &str,
        _task: &GenerationTask,
    ) -> HaltResult<Generation> {
        self.calls.refine.fetch_add(1, Ordering::SeqCst);
        self.calls
            .diagnostics
            .lock()
            .expect("diagnostics lock")
            .push(diagnostics.to_string());
        self.next("refine")
    }

    fn finish(&mut self) -> HaltResult<Vec<ChatMessage>> {
        self.calls.finish.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            ChatMessage::user("finish"),
            ChatMessage::assistant("FINISH GENERATION"),
        ])
    }
}

/// Factory handing out [`ScriptedAgent`]s and remembering which models
/// were asked for.
pub struct ScriptedAgentFactory {
    artifacts: Vec<String>,
    blocking: bool,
    requested: Mutex<Vec<String>>,
}

impl ScriptedAgentFactory {
    pub fn new<I, S>(artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            artifacts: artifacts.into_iter().map(Into::into).collect(),
            blocking: false,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn blocking() -> Self {
        Self {
            blocking: true,
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn requested_models(&self) -> Vec<String> {
        self.requested.lock().expect("requested lock").clone()
    }
}

impl AgentFactory for ScriptedAgentFactory {
    fn agent_for(&self, model: &str) -> Result<Box<dyn GenerationAgent>> {
        self.requested
            .lock()
            .expect("requested lock")
            .push(model.to_string());
        let agent = if self.blocking {
            ScriptedAgent::blocking()
        } else {
            ScriptedAgent::new(self.artifacts.clone())
        };
        Ok(Box::new(agent))
    }
}

/// Executor replaying queued reports.
///
/// Once the queue is empty it repeats the configured report, or fails.
pub struct ScriptedExecutor {
    reports: Mutex<VecDeque<ExecutionReport>>,
    repeat: Option<ExecutionReport>,
    calls: AtomicU32,
    stop_on: Option<(u32, CancellationToken)>,
}

impl ScriptedExecutor {
    pub fn new(reports: impl IntoIterator<Item = ExecutionReport>) -> Self {
        Self {
            reports: Mutex::new(reports.into_iter().collect()),
            repeat: None,
            calls: AtomicU32::new(0),
            stop_on: None,
        }
    }

    pub fn repeating(report: ExecutionReport) -> Self {
        Self {
            repeat: Some(report),
            ..Self::new([])
        }
    }

    /// Set `token` while serving the `call`-th request (1-based).
    pub fn stop_on_call(mut self, call: u32, token: CancellationToken) -> Self {
        self.stop_on = Some((call, token));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TestExecutor for ScriptedExecutor {
    fn compile_and_execute(&self, _artifact: &str, _target: &TestTarget) -> Result<ExecutionReport> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((stop_call, token)) = &self.stop_on
            && *stop_call == call
        {
            token.set();
        }
        let queued = self.reports.lock().expect("reports lock").pop_front();
        queued
            .or_else(|| self.repeat.clone())
            .ok_or_else(|| anyhow!("no scripted report for call {call}"))
    }
}
