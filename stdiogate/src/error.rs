//! Error types for the gateway process.
//!
//! `FramingError` covers one NDJSON record failing to parse. It is always
//! local to that record: the reader skips it and moves on.
//!
//! `WriteError` covers the child's stdin going away. `SpawnError` and
//! `SupervisorError` cover the child's lifecycle. `RegistryError` covers
//! session and correlation bookkeeping. `StartupError` and `ConfigError`
//! are fatal before the gateway starts serving.
//!
//! Client-visible failures are translated into
//! [`stdiogate_core::GatewayError`] at the router boundary.

use std::net::SocketAddr;

use stdiogate_core::GatewayError;

use crate::session::CorrelationKey;

// ─────────────────────────────────────────────────────────────────────────────
// Framing
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur when parsing one NDJSON-framed JSON-RPC record.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// A single record exceeds the maximum size.
    ///
    /// Checked before JSON parsing; the remainder of the line is drained.
    #[error("Message exceeds maximum size of {max_bytes} bytes")]
    MessageTooLarge { max_bytes: usize },

    /// The record is not valid UTF-8.
    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    /// The record is not valid JSON.
    #[error("Malformed JSON: {reason}")]
    MalformedJson { reason: String },

    /// The `jsonrpc` field is absent.
    #[error("Missing required jsonrpc field")]
    MissingVersion,

    /// The `jsonrpc` field is present but not `"2.0"`.
    #[error("Unsupported JSON-RPC version: {version}")]
    UnsupportedVersion { version: String },

    /// The record is a JSON array (a batch). MCP does not use batches.
    #[error("JSON-RPC batch requests (arrays) are not supported")]
    UnsupportedBatch,

    /// Valid JSON-RPC version but not a request, response or notification,
    /// or a response without exactly one of `result` and `error`.
    #[error("Invalid JSON-RPC envelope: {reason}")]
    InvalidEnvelope { reason: String },

    /// The underlying stream failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    /// Stable label for logs and metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::InvalidUtf8 => "invalid_utf8",
            Self::MalformedJson { .. } => "malformed_json",
            Self::MissingVersion => "missing_version",
            Self::UnsupportedVersion { .. } => "unsupported_version",
            Self::UnsupportedBatch => "unsupported_batch",
            Self::InvalidEnvelope { .. } => "invalid_envelope",
            Self::Io(_) => "io",
        }
    }
}

impl From<FramingError> for GatewayError {
    fn from(err: FramingError) -> Self {
        match err {
            FramingError::MalformedJson { .. }
            | FramingError::InvalidUtf8
            | FramingError::MessageTooLarge { .. } => GatewayError::ParseError {
                details: err.to_string(),
            },
            FramingError::Io(_) => GatewayError::InternalError {
                details: err.to_string(),
            },
            _ => GatewayError::InvalidRequest {
                details: err.to_string(),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Child stdin
// ─────────────────────────────────────────────────────────────────────────────

/// Failure to hand a message to the child's stdin.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The writer was closed (child stopping or a previous write failed).
    #[error("child stdin is closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("write to child stdin failed: {0}")]
    Io(#[from] std::io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Child lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// The child executable could not be started.
#[derive(Debug, thiserror::Error)]
#[error("failed to spawn child '{program}': {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// Fatal supervisor outcomes.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The child kept failing and the restart bound was reached.
    #[error("child restart limit reached after {attempts} attempts")]
    RestartsExhausted { attempts: u32 },

    /// The supervisor task itself panicked or was cancelled.
    #[error("supervisor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Session registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("request id {client_id} is already pending in session {session_id}")]
    DuplicateId {
        session_id: String,
        client_id: String,
    },

    #[error("session {session_id} is closed or unknown")]
    SessionClosed { session_id: String },

    #[error("correlation key {key} is not pending")]
    UnknownCorrelation { key: CorrelationKey },

    #[error("session limit of {max_sessions} reached")]
    SessionLimitReached { max_sessions: usize },
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateId { client_id, .. } => {
                GatewayError::DuplicateId { id: client_id }
            }
            RegistryError::SessionClosed { session_id } => {
                GatewayError::SessionClosed { session_id }
            }
            RegistryError::UnknownCorrelation { key } => {
                GatewayError::UnknownCorrelation { key: key.get() }
            }
            RegistryError::SessionLimitReached { max_sessions } => {
                GatewayError::SessionLimitReached { max_sessions }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup / configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Invalid configuration, detected before anything is spawned.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no child command given (pass it after `--`)")]
    MissingCommand,

    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("endpoint path '{path}' must start with '/' and must not be a reserved path")]
    InvalidPath { path: String },

    #[error("invalid session marker key '{key}'")]
    InvalidMarkerKey { key: String },

    #[error("initial backoff ({initial_ms}ms) exceeds maximum backoff ({max_ms}ms)")]
    BackoffOrder { initial_ms: u64, max_ms: u64 },
}

/// Fatal errors while bringing the gateway up.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
