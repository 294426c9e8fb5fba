//! Outbound wire schema for streamed session progress.
//!
//! Every notification is one JSON object `{type, data}` written as a single
//! line. The set of message types is closed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::ChatMessage;

/// One streamed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Outbound {
    Status(StatusData),
    Msg(MsgData),
    #[serde(rename = "noreference")]
    NoReference(NoReferenceData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Start,
    Finish,
    /// Internal failure after the stream was already committed.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusData {
    pub status: StatusKind,
    pub message: StatusBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusBody {
    Session { session_id: String },
    Text(String),
}

/// Full exchange log of a session; never a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgData {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoReferenceData {
    pub session_id: String,
    pub junit_version: u32,
}

impl Outbound {
    pub fn start(session_id: &str) -> Self {
        Self::session_status(StatusKind::Start, session_id)
    }

    pub fn finish(session_id: &str) -> Self {
        Self::session_status(StatusKind::Finish, session_id)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Outbound::Status(StatusData {
            status: StatusKind::Error,
            message: StatusBody::Text(message.into()),
        })
    }

    pub fn msg(session_id: &str, messages: Vec<ChatMessage>) -> Self {
        Outbound::Msg(MsgData {
            session_id: session_id.to_string(),
            messages,
        })
    }

    pub fn no_reference(session_id: &str, junit_version: u32) -> Self {
        Outbound::NoReference(NoReferenceData {
            session_id: session_id.to_string(),
            junit_version,
        })
    }

    fn session_status(status: StatusKind, session_id: &str) -> Self {
        Outbound::Status(StatusData {
            status,
            message: StatusBody::Session {
                session_id: session_id.to_string(),
            },
        })
    }

    /// Serialize to compact JSON without a trailing newline.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("serialize outbound message")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn encoded(message: &Outbound) -> Value {
        let bytes = message.encode().expect("encode");
        serde_json::from_slice(&bytes).expect("valid json")
    }

    #[test]
    fn start_message_shape() {
        assert_eq!(
            encoded(&Outbound::start("sess-2")),
            json!({"type": "status", "data": {"status": "start", "message": {"session_id": "sess-2"}}})
        );
    }

    #[test]
    fn finish_message_shape() {
        assert_eq!(
            encoded(&Outbound::finish("sess-3")),
            json!({"type": "status", "data": {"status": "finish", "message": {"session_id": "sess-3"}}})
        );
    }

    #[test]
    fn error_message_carries_text() {
        assert_eq!(
            encoded(&Outbound::error("boom")),
            json!({"type": "status", "data": {"status": "error", "message": "boom"}})
        );
    }

    #[test]
    fn msg_carries_full_log() {
        let message = Outbound::msg("sess-4", vec![ChatMessage::assistant("Hello")]);
        assert_eq!(
            encoded(&message),
            json!({"type": "msg", "data": {"session_id": "sess-4", "messages": [{"role": "assistant", "content": "Hello"}]}})
        );
    }

    #[test]
    fn noreference_shape() {
        assert_eq!(
            encoded(&Outbound::no_reference("sess-5", 5)),
            json!({"type": "noreference", "data": {"session_id": "sess-5", "junit_version": 5}})
        );
    }

    #[test]
    fn encoded_line_parses_back() {
        let original = Outbound::start("sess-6");
        let bytes = original.encode().expect("encode");
        let parsed: Outbound = serde_json::from_slice(&bytes).expect("decode");
        assert_eq!(parsed, original);
    }
}
