//! Shared building blocks for the stdiogate gateway.
//!
//! - [`jsonrpc`]: JSON-RPC 2.0 ids and message classification
//! - [`error`]: client-facing error taxonomy and JSON-RPC error formatting
//! - [`lifecycle`]: Starting → Ready → ShuttingDown → Stopped state and probes
//! - [`metrics`]: Prometheus metrics for sessions, requests and the child

pub mod error;
pub mod jsonrpc;
pub mod lifecycle;
pub mod metrics;

pub use error::GatewayError;
pub use jsonrpc::{JsonRpcId, JsonRpcMessageKind, classify_jsonrpc};
