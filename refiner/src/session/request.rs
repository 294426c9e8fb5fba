//! Validation of inbound session-open, stop and configuration requests.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::types::QueryData;

/// Malformed or incomplete request; no session is created.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("request body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request body must be a JSON object")]
    NotObject,
    #[error("unsupported request type")]
    UnsupportedType,
    #[error("query data must be a JSON object")]
    DataNotObject,
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("field `{0}` must be a string")]
    InvalidField(String),
    #[error("missing session_id")]
    MissingSessionId,
    #[error("invalid payload: {0}")]
    InvalidVersion(String),
}

/// A validated session-open request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub session_id: String,
    pub query: QueryData,
}

/// Parse a request body. An empty body is treated as `{}`.
pub fn parse_body(body: &[u8]) -> Result<Value, ProtocolError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_json::from_slice(body)?)
}

/// Validate `{type: "query", session_id?, data: {...}}`.
///
/// The session id falls back to `id`, then to a fresh random identifier.
pub fn parse_open_request(payload: &Value) -> Result<OpenRequest, ProtocolError> {
    let object = payload.as_object().ok_or(ProtocolError::NotObject)?;
    if object.get("type").and_then(Value::as_str) != Some("query") {
        return Err(ProtocolError::UnsupportedType);
    }
    let data = object
        .get("data")
        .and_then(Value::as_object)
        .ok_or(ProtocolError::DataNotObject)?;

    let missing: Vec<String> = QueryData::REQUIRED_FIELDS
        .iter()
        .filter(|field| !data.contains_key(**field))
        .map(|field| field.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ProtocolError::MissingFields(missing));
    }

    let field = |name: &str| -> Result<String, ProtocolError> {
        data.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::InvalidField(name.to_string()))
    };
    let query = QueryData {
        target_focal_method: field("target_focal_method")?,
        target_focal_file: field("target_focal_file")?,
        test_desc: field("test_desc")?,
        project_path: field("project_path")?,
        focal_file_path: field("focal_file_path")?,
    };

    let session_id = ["session_id", "id"]
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .find(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_session_id);

    Ok(OpenRequest { session_id, query })
}

/// Validate `{session_id}` for a stop request.
pub fn parse_stop_request(payload: &Value) -> Result<String, ProtocolError> {
    payload
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(ProtocolError::MissingSessionId)
}

/// Validate `{data: <version>}`; accepts an integer or a numeric string.
pub fn parse_junit_version(payload: &Value) -> Result<u32, ProtocolError> {
    let data = payload
        .get("data")
        .ok_or_else(|| ProtocolError::InvalidVersion("missing data".to_string()))?;
    let parsed = match data {
        Value::Number(number) => number.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ProtocolError::InvalidVersion(format!("not a version: {data}")))
}

/// Random 32-character lowercase alphanumeric session id.
pub fn new_session_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(32)
        .collect::<String>()
        .to_lowercase()
}
