//! stdiogate: expose a stdio JSON-RPC (MCP) server over streaming HTTP.
//!
//! One child process speaks newline-delimited JSON-RPC on its stdio. Many
//! HTTP clients share it: each client request gets a gateway-unique id on
//! the way in, and the child's response is routed back to the one session
//! that sent it, with the client's original id restored.

pub mod cli;
pub mod config;
pub mod error;
pub mod framing;
pub mod gateway;
pub mod router;
pub mod server;
pub mod session;
pub mod supervisor;
