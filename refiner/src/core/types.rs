//! Shared deterministic types for the refinement loop.
//!
//! These types define stable contracts between the orchestrator, the
//! capabilities it drives, and the wire protocol. They carry no I/O.

use serde::{Deserialize, Serialize};

/// Author of one entry in an exchange log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role/content entry of a model exchange, as streamed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Input payload of a session-open request. Read-only after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryData {
    pub target_focal_method: String,
    pub target_focal_file: String,
    pub test_desc: String,
    pub project_path: String,
    pub focal_file_path: String,
}

impl QueryData {
    /// Fields every session-open request must carry inside `data`.
    pub const REQUIRED_FIELDS: [&'static str; 5] = [
        "target_focal_method",
        "target_focal_file",
        "test_desc",
        "project_path",
        "focal_file_path",
    ];
}

/// Everything a GenerationAgent needs to write or repair one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationTask {
    pub focal_method: String,
    /// Source of the class declaring the focal method.
    pub focal_context: String,
    pub test_class: String,
    pub test_desc: String,
    pub referable_test: Option<String>,
    pub facts: Vec<String>,
    pub junit_version: u32,
}

/// Verdict for one candidate artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Success,
    FailCompile,
    FailExecute,
    FailPass,
}

impl TestStatus {
    pub fn is_success(self) -> bool {
        self == TestStatus::Success
    }
}

/// Raw report returned by an Executor for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub compile_log: String,
    pub execute_log: String,
    pub compile_succeeded: bool,
    pub execute_succeeded: bool,
}

/// One artifact-producing call of a GenerationAgent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Candidate test case extracted from the response.
    pub artifact: String,
    /// Prompt that produced it.
    pub prompt: String,
    /// Raw model response before extraction.
    pub response: String,
    /// Exchange log of this call (prompt and response).
    pub exchange: Vec<ChatMessage>,
}

/// One round of the loop, recorded in the per-run generation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationAttempt {
    /// 0 for the initial generation, 1..=max_round for refinements.
    pub round: u32,
    pub prompt: String,
    pub response: String,
    pub artifact: String,
    pub status: TestStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let raw = serde_json::to_string(&TestStatus::FailCompile).expect("serialize");
        assert_eq!(raw, "\"fail_compile\"");
        let parsed: TestStatus = serde_json::from_str("\"fail_pass\"").expect("parse");
        assert_eq!(parsed, TestStatus::FailPass);
    }

    #[test]
    fn chat_message_uses_lowercase_roles() {
        let value = serde_json::to_value(ChatMessage::assistant("hi")).expect("serialize");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"], "hi");
    }
}
