//! Client-facing error taxonomy for the gateway.
//!
//! Every failure that an HTTP client can observe is a [`GatewayError`]. Each
//! variant maps to a JSON-RPC error code and a stable `error_type` name used
//! in `error.data` and as a metrics label.
//!
//! Process-level failures (spawn, framing, stdin writes) live in the gateway
//! crate; they surface to clients only after being translated into one of
//! these variants.

pub mod jsonrpc;

use jsonrpc::{ErrorData, JsonRpcError, JsonRpcErrorResponse};
use thiserror::Error;

use crate::jsonrpc::JsonRpcId;

/// All error types an HTTP client of the gateway can observe.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    // ─────────────────────────────────────────────────────────────────────
    // Protocol errors
    // ─────────────────────────────────────────────────────────────────────
    /// Body is not valid JSON.
    #[error("Parse error: {details}")]
    ParseError { details: String },

    /// Body is JSON but not a valid JSON-RPC 2.0 envelope for this endpoint.
    #[error("Invalid request: {details}")]
    InvalidRequest { details: String },

    /// The child sent a request the gateway cannot route to any client.
    #[error("Method '{method}' not found")]
    MethodNotFound { method: String },

    // ─────────────────────────────────────────────────────────────────────
    // Child process errors
    // ─────────────────────────────────────────────────────────────────────
    /// The child process is not running, or its stdin is closed.
    #[error("Child process unavailable: {reason}")]
    ChildUnavailable { reason: String },

    /// The child did not answer within the per-request timeout.
    #[error("Request timed out after {timeout_ms}ms")]
    RequestTimeout { timeout_ms: u64 },

    // ─────────────────────────────────────────────────────────────────────
    // Session and correlation errors
    // ─────────────────────────────────────────────────────────────────────
    /// The client reused a request id that is still pending in its session.
    #[error("Request id {id} is already pending in this session")]
    DuplicateId { id: String },

    /// A correlation key is not (or no longer) tracked.
    #[error("Unknown correlation key {key}")]
    UnknownCorrelation { key: u64 },

    /// The session does not exist or has been closed.
    #[error("Session '{session_id}' is closed or unknown")]
    SessionClosed { session_id: String },

    /// A response stream is already attached to the session.
    #[error("Session '{session_id}' already has an attached stream")]
    StreamAlreadyAttached { session_id: String },

    /// Opening another session would exceed the configured maximum.
    #[error("Session limit of {max_sessions} reached")]
    SessionLimitReached { max_sessions: usize },

    /// The session's outbound queue overflowed and the session was closed.
    #[error("Session outbound queue overflowed (capacity {capacity})")]
    SessionOverflow { capacity: usize },

    // ─────────────────────────────────────────────────────────────────────
    // Gateway errors
    // ─────────────────────────────────────────────────────────────────────
    /// The gateway is draining and no longer accepts work.
    #[error("Gateway is shutting down")]
    ShuttingDown,

    /// Unexpected internal failure.
    #[error("Internal error: {details}")]
    InternalError { details: String },
}

impl GatewayError {
    /// Maps error to JSON-RPC 2.0 error code.
    ///
    /// Standard JSON-RPC codes (-32700 to -32603) are used for protocol errors.
    /// Gateway codes (-32000 to -32009) are used for everything else.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            Self::ParseError { .. } => -32700,
            Self::InvalidRequest { .. } => -32600,
            Self::MethodNotFound { .. } => -32601,
            Self::InternalError { .. } => -32603,

            Self::ChildUnavailable { .. } => -32000,
            Self::RequestTimeout { .. } => -32001,
            Self::DuplicateId { .. } => -32002,
            Self::UnknownCorrelation { .. } => -32003,
            Self::SessionClosed { .. } => -32004,
            Self::StreamAlreadyAttached { .. } => -32005,
            Self::SessionLimitReached { .. } => -32006,
            Self::SessionOverflow { .. } => -32007,
            Self::ShuttingDown => -32008,
        }
    }

    /// Returns the error type name for metrics and logging.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "parse_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::ChildUnavailable { .. } => "child_unavailable",
            Self::RequestTimeout { .. } => "request_timeout",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::UnknownCorrelation { .. } => "unknown_correlation",
            Self::SessionClosed { .. } => "session_closed",
            Self::StreamAlreadyAttached { .. } => "stream_already_attached",
            Self::SessionLimitReached { .. } => "session_limit_reached",
            Self::SessionOverflow { .. } => "session_overflow",
            Self::ShuttingDown => "shutting_down",
            Self::InternalError { .. } => "internal_error",
        }
    }

    /// Returns safe details for client consumption.
    ///
    /// Child exit reasons and internal details stay in the logs.
    pub fn safe_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::MethodNotFound { method } => Some(serde_json::json!({ "method": method })),
            Self::RequestTimeout { timeout_ms } => {
                Some(serde_json::json!({ "timeout_ms": timeout_ms }))
            }
            Self::DuplicateId { id } => Some(serde_json::json!({ "id": id })),
            Self::SessionClosed { session_id } | Self::StreamAlreadyAttached { session_id } => {
                Some(serde_json::json!({ "session_id": session_id }))
            }
            Self::SessionLimitReached { max_sessions } => {
                Some(serde_json::json!({ "max_sessions": max_sessions }))
            }
            Self::SessionOverflow { capacity } => {
                Some(serde_json::json!({ "capacity": capacity }))
            }
            _ => None,
        }
    }

    /// Converts error to a JSON-RPC error object.
    pub fn to_jsonrpc_error(&self, correlation_id: &str) -> JsonRpcError {
        JsonRpcError {
            code: self.to_jsonrpc_code(),
            message: self.to_string(),
            data: Some(ErrorData {
                correlation_id: correlation_id.to_string(),
                error_type: self.error_type_name().to_string(),
                details: self.safe_details(),
            }),
        }
    }

    /// Converts error to a full JSON-RPC error response answering `id`.
    pub fn to_response(&self, id: JsonRpcId, correlation_id: &str) -> JsonRpcErrorResponse {
        JsonRpcErrorResponse::new(id, self.to_jsonrpc_error(correlation_id))
    }
}
