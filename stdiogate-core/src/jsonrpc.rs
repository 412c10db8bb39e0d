//! Transport-agnostic JSON-RPC 2.0 message classification.
//!
//! Both sides of the gateway speak JSON-RPC: HTTP clients post envelopes and
//! the child process writes them to stdout. This module classifies an
//! already-parsed `serde_json::Value` so the framer and the HTTP transport
//! share one notion of "request", "response" and "notification".

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// JSON-RPC 2.0 request identifier.
///
/// Never coerce between variants: a client that sent `"id": 1` must get
/// `"id": 1` back, not `"id": "1"`.
///
/// `Number` is wide enough for every JSON integer `serde_json` parses, so
/// ids above `i64::MAX` survive the round trip.
///
/// `Null` is an explicit `"id": null`, which is distinct from a missing `id`
/// (a notification).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer ID (e.g., `"id": 1`)
    Number(i128),
    /// String ID (e.g., `"id": "abc-123"`)
    String(String),
    /// Explicit null ID
    Null,
}

impl JsonRpcId {
    /// Convert back into the JSON value that goes on the wire.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            JsonRpcId::Number(n) => number_value(*n),
            JsonRpcId::String(s) => Value::String(s.clone()),
            JsonRpcId::Null => Value::Null,
        }
    }
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonRpcId::Number(n) => write!(f, "{n}"),
            JsonRpcId::String(s) => write!(f, "\"{s}\""),
            JsonRpcId::Null => write!(f, "null"),
        }
    }
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => match (i64::try_from(*n), u64::try_from(*n)) {
                (Ok(v), _) => serializer.serialize_i64(v),
                (_, Ok(v)) => serializer.serialize_u64(v),
                _ => serializer.serialize_i128(*n),
            },
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_id(&value).map_err(|()| {
            serde::de::Error::custom("JSON-RPC ID must be string, integer, or null")
        })
    }
}

/// Transport-agnostic JSON-RPC 2.0 message classification.
///
/// Determined by presence/absence of `id` and `method` fields:
/// - Request: has both `id` and `method`
/// - Response: has `id` but no `method`
/// - Notification: has `method` but no `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcMessageKind {
    /// Has both `id` and `method`, expects a response.
    Request { id: JsonRpcId, method: String },
    /// Has `id` but no `method`, answers a previous request.
    Response { id: JsonRpcId },
    /// Has `method` but no `id`, fire-and-forget.
    Notification { method: String },
}

impl JsonRpcMessageKind {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Notification { .. } => "notification",
        }
    }
}

/// Classify a parsed JSON-RPC value without taking ownership.
///
/// Validates the `"jsonrpc": "2.0"` version field, then classifies based on
/// the presence of `id` and `method` fields.
///
/// # Errors
///
/// Returns `JsonRpcClassifyError` if:
/// - The `jsonrpc` field is missing or not `"2.0"` (`InvalidVersion`)
/// - The `id` field is present but not a valid JSON-RPC ID (`InvalidId`)
/// - `method` is present but not a string (`InvalidMethod`)
/// - Neither `id` nor `method` is present (`Unclassifiable`)
pub fn classify_jsonrpc(value: &Value) -> Result<JsonRpcMessageKind, JsonRpcClassifyError> {
    let version = value.get("jsonrpc").and_then(|v| v.as_str());
    if version != Some("2.0") {
        return Err(JsonRpcClassifyError::InvalidVersion);
    }

    let id = value
        .get("id")
        .map(parse_id)
        .transpose()
        .map_err(|()| JsonRpcClassifyError::InvalidId)?;
    let method = match value.get("method") {
        Some(Value::String(m)) => Some(m.clone()),
        Some(_) => return Err(JsonRpcClassifyError::InvalidMethod),
        None => None,
    };

    match (id, method) {
        (Some(id), Some(method)) => Ok(JsonRpcMessageKind::Request { id, method }),
        (Some(id), None) => Ok(JsonRpcMessageKind::Response { id }),
        (None, Some(method)) => Ok(JsonRpcMessageKind::Notification { method }),
        (None, None) => Err(JsonRpcClassifyError::Unclassifiable),
    }
}

/// Accepts string, integer, or null. Rejects floats, booleans, arrays, objects.
fn parse_id(value: &Value) -> Result<JsonRpcId, ()> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .map(JsonRpcId::Number)
            .ok_or(()),
        Value::String(s) => Ok(JsonRpcId::String(s.clone())),
        Value::Null => Ok(JsonRpcId::Null),
        _ => Err(()),
    }
}

fn number_value(n: i128) -> Value {
    match (i64::try_from(n), u64::try_from(n)) {
        (Ok(v), _) => Value::from(v),
        (_, Ok(v)) => Value::from(v),
        // parse_id only builds values inside the i64/u64 range.
        _ => Value::from(n as f64),
    }
}

/// Errors that can occur during JSON-RPC message classification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JsonRpcClassifyError {
    /// The `jsonrpc` field is missing or not `"2.0"`.
    #[error("missing or invalid jsonrpc version field")]
    InvalidVersion,
    /// The `id` field is present but not a string, integer or null.
    #[error("invalid id field")]
    InvalidId,
    /// The `method` field is present but not a string.
    #[error("method must be a string")]
    InvalidMethod,
    /// The message has neither `id` nor `method`.
    #[error("message has neither id nor method")]
    Unclassifiable,
}
