//! JSON-RPC 2.0 error response structures.

use serde::{Deserialize, Serialize};

use crate::jsonrpc::JsonRpcId;

/// JSON-RPC 2.0 error object.
///
/// Embedded in error responses written to HTTP clients and, for requests the
/// gateway refuses on the child's behalf, to the child's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard or gateway-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// Additional error context data.
///
/// All fields are safe for client consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ErrorData {
    /// Identifier for finding this error in the gateway's logs
    pub correlation_id: String,

    /// Machine-readable error type name (for metrics/logging)
    pub error_type: String,

    /// Type-specific error details (sanitized)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// A complete JSON-RPC 2.0 error response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub id: JsonRpcId,
    pub error: JsonRpcError,
}

impl JsonRpcErrorResponse {
    #[must_use]
    pub fn new(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            error,
        }
    }

    /// Render as a `serde_json::Value` ready to be queued on a session stream.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.error.code,
            "message": self.error.message,
        });
        if let Some(data) = &self.error.data {
            let mut data_value = serde_json::json!({
                "correlation_id": data.correlation_id,
                "error_type": data.error_type,
            });
            if let Some(details) = &data.details {
                data_value["details"] = details.clone();
            }
            error["data"] = data_value;
        }
        serde_json::json!({
            "jsonrpc": self.jsonrpc,
            "id": self.id.to_value(),
            "error": error,
        })
    }
}
