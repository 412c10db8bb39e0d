//! NDJSON framing for the child's stdio and for HTTP request bodies.
//!
//! [`parse_frame`] is the single validation path for every JSON-RPC envelope
//! the gateway accepts, whichever side it comes from. [`FrameReader`] turns
//! the child's stdout into a sequence of frames, skipping malformed records;
//! [`FrameWriter`] serializes frames onto the child's stdin one whole line at
//! a time.

mod reader;
mod writer;

pub use reader::FrameReader;
pub use writer::FrameWriter;

use serde_json::Value;
use stdiogate_core::jsonrpc::{JsonRpcClassifyError, JsonRpcMessageKind, classify_jsonrpc};

use crate::error::FramingError;

/// Maximum NDJSON record size (10 MiB).
///
/// Lines exceeding this limit are rejected before JSON parsing.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// One parsed, classified JSON-RPC envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: JsonRpcMessageKind,
    /// The full envelope. The router rewrites `id` in place.
    pub message: Value,
}

impl Frame {
    /// Whether a response frame carries `error` rather than `result`.
    #[must_use]
    pub fn is_error_response(&self) -> bool {
        matches!(self.kind, JsonRpcMessageKind::Response { .. }) && self.message.get("error").is_some()
    }
}

/// Parse a single NDJSON record into a [`Frame`].
///
/// Performs size validation, JSON parsing, batch rejection and JSON-RPC
/// classification in sequence.
///
/// # Errors
///
/// - `MessageTooLarge`: checked on the raw length before parsing
/// - `MalformedJson`: empty or not JSON
/// - `UnsupportedBatch`: top-level array
/// - `MissingVersion` / `UnsupportedVersion`: bad `jsonrpc` field
/// - `InvalidEnvelope`: non-object, bad `id`/`method`, unclassifiable, or a
///   response without exactly one of `result` and `error`
pub fn parse_frame(line: &str) -> Result<Frame, FramingError> {
    if line.len() > MAX_MESSAGE_BYTES {
        return Err(FramingError::MessageTooLarge {
            max_bytes: MAX_MESSAGE_BYTES,
        });
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(FramingError::MalformedJson {
            reason: "empty message".to_string(),
        });
    }

    let message: Value = serde_json::from_str(trimmed).map_err(|e| FramingError::MalformedJson {
        reason: e.to_string(),
    })?;

    if message.is_array() {
        return Err(FramingError::UnsupportedBatch);
    }
    if !message.is_object() {
        return Err(FramingError::InvalidEnvelope {
            reason: "message is not a JSON object".to_string(),
        });
    }

    let kind = classify_jsonrpc(&message).map_err(|e| match e {
        JsonRpcClassifyError::InvalidVersion => {
            match message.get("jsonrpc").and_then(|v| v.as_str()) {
                Some(v) => FramingError::UnsupportedVersion {
                    version: v.to_string(),
                },
                None => FramingError::MissingVersion,
            }
        }
        other => FramingError::InvalidEnvelope {
            reason: other.to_string(),
        },
    })?;

    if matches!(kind, JsonRpcMessageKind::Response { .. }) {
        match (message.get("result").is_some(), message.get("error").is_some()) {
            (true, false) | (false, true) => {}
            (false, false) => {
                return Err(FramingError::InvalidEnvelope {
                    reason: "response has neither result nor error".to_string(),
                });
            }
            (true, true) => {
                return Err(FramingError::InvalidEnvelope {
                    reason: "response has both result and error".to_string(),
                });
            }
        }
    }

    Ok(Frame { kind, message })
}

/// Parse an HTTP request body. Bodies are not line-delimited, so interior
/// newlines are allowed; everything else matches [`parse_frame`].
pub fn parse_body(body: &[u8]) -> Result<Frame, FramingError> {
    let text = std::str::from_utf8(body).map_err(|_| FramingError::InvalidUtf8)?;
    parse_frame(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stdiogate_core::jsonrpc::JsonRpcId;

    #[test]
    fn test_parse_request() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"search"}}"#;
        let frame = parse_frame(line).unwrap();
        assert_eq!(
            frame.kind,
            JsonRpcMessageKind::Request {
                id: JsonRpcId::Number(1),
                method: "tools/call".to_string(),
            }
        );
        assert_eq!(frame.message["params"]["name"], "search");
    }

    #[test]
    fn test_parse_response_and_error_response() {
        let ok = parse_frame(r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#).unwrap();
        assert_eq!(
            ok.kind,
            JsonRpcMessageKind::Response {
                id: JsonRpcId::Number(1)
            }
        );
        assert!(!ok.is_error_response());

        let err =
            parse_frame(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-1,"message":"x"}}"#).unwrap();
        assert!(err.is_error_response());
    }

    #[test]
    fn test_parse_notification() {
        let frame = parse_frame(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).unwrap();
        assert_eq!(
            frame.kind,
            JsonRpcMessageKind::Notification {
                method: "notifications/progress".to_string()
            }
        );
    }

    #[test]
    fn test_parse_oversized_message() {
        let big = "x".repeat(MAX_MESSAGE_BYTES + 1);
        let err = parse_frame(&big).unwrap_err();
        assert!(
            matches!(err, FramingError::MessageTooLarge { max_bytes } if max_bytes == MAX_MESSAGE_BYTES)
        );
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = parse_frame(r#"{"truncated"#).unwrap_err();
        assert!(matches!(err, FramingError::MalformedJson { .. }));
    }

    #[test]
    fn test_parse_empty_line() {
        let err = parse_frame("  \n  ").unwrap_err();
        assert!(
            matches!(err, FramingError::MalformedJson { ref reason } if reason == "empty message")
        );
    }

    #[test]
    fn test_parse_version_errors() {
        assert!(matches!(
            parse_frame(r#"{"id":1,"method":"x"}"#).unwrap_err(),
            FramingError::MissingVersion
        ));
        assert!(matches!(
            parse_frame(r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).unwrap_err(),
            FramingError::UnsupportedVersion { ref version } if version == "1.0"
        ));
    }

    #[test]
    fn test_parse_batch_rejected() {
        let err = parse_frame(r#"[{"jsonrpc":"2.0","id":1,"method":"x"}]"#).unwrap_err();
        assert!(matches!(err, FramingError::UnsupportedBatch));
    }

    #[test]
    fn test_parse_scalar_rejected() {
        let err = parse_frame("42").unwrap_err();
        assert!(matches!(err, FramingError::InvalidEnvelope { .. }));
    }

    #[test]
    fn test_parse_no_id_no_method() {
        let err = parse_frame(r#"{"jsonrpc":"2.0"}"#).unwrap_err();
        assert!(
            matches!(err, FramingError::InvalidEnvelope { ref reason } if reason.contains("neither id nor method")),
            "got: {err:?}"
        );
    }

    #[test]
    fn test_parse_response_needs_result_or_error() {
        let err = parse_frame(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert!(
            matches!(err, FramingError::InvalidEnvelope { ref reason } if reason.contains("neither result nor error")),
            "got: {err:?}"
        );

        let err = parse_frame(r#"{"jsonrpc":"2.0","id":1,"result":1,"error":{"code":-1,"message":"x"}}"#)
            .unwrap_err();
        assert!(
            matches!(err, FramingError::InvalidEnvelope { ref reason } if reason.contains("both")),
            "got: {err:?}"
        );

        // A null result is still a result.
        assert!(parse_frame(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).is_ok());
    }

    #[test]
    fn test_parse_float_id_rejected() {
        let err = parse_frame(r#"{"jsonrpc":"2.0","id":1.5,"method":"x"}"#).unwrap_err();
        assert!(matches!(err, FramingError::InvalidEnvelope { .. }));
    }

    #[test]
    fn test_parse_large_valid_message() {
        let payload = "A".repeat(5 * 1024 * 1024);
        let line = format!(r#"{{"jsonrpc":"2.0","id":1,"result":{{"data":"{payload}"}}}}"#);
        assert!(parse_frame(&line).is_ok());
    }

    #[test]
    fn test_parse_body_allows_pretty_printed_json() {
        let body = b"{\n  \"jsonrpc\": \"2.0\",\n  \"id\": \"a\",\n  \"method\": \"ping\"\n}\n";
        let frame = parse_body(body).unwrap();
        assert!(matches!(frame.kind, JsonRpcMessageKind::Request { .. }));
    }

    #[test]
    fn test_parse_body_rejects_invalid_utf8() {
        let err = parse_body(&[0xff, 0xfe, b'{']).unwrap_err();
        assert!(matches!(err, FramingError::InvalidUtf8));
    }
}
