//! Command-line interface.
//!
//! Defined separately from `main.rs` so tests can parse argument vectors
//! with `Cli::try_parse_from`. Every option has a `STDIOGATE_*` environment
//! fallback.

use std::net::IpAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::{
    ChildCommand, GatewayConfig, NotificationPolicy, RestartPolicy, ShutdownGrace, TransportMode,
};
use crate::error::ConfigError;

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Expose a stdio JSON-RPC (MCP) server over a streaming HTTP transport.
#[derive(Parser, Debug)]
#[command(name = "stdiogate", version)]
pub struct Cli {
    /// Response stream framing.
    #[arg(long, value_enum, default_value = "sse", env = "STDIOGATE_TRANSPORT")]
    pub transport: TransportMode,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1", env = "STDIOGATE_BIND")]
    pub bind: IpAddr,

    /// Port to listen on.
    #[arg(long, short, default_value_t = 8000, env = "STDIOGATE_PORT")]
    pub port: u16,

    /// HTTP path of the MCP endpoint.
    #[arg(long, default_value = "/mcp", env = "STDIOGATE_PATH")]
    pub path: String,

    /// Per-session outbound queue capacity, in messages.
    #[arg(long, default_value_t = 256, env = "STDIOGATE_SESSION_QUEUE")]
    pub session_queue: usize,

    /// Maximum concurrently open sessions.
    #[arg(long, default_value_t = 1024, env = "STDIOGATE_MAX_SESSIONS")]
    pub max_sessions: usize,

    /// Maximum HTTP request body size in bytes.
    #[arg(long, default_value_t = crate::framing::MAX_MESSAGE_BYTES, env = "STDIOGATE_MAX_BODY_BYTES")]
    pub max_body_bytes: usize,

    /// Per-request timeout in seconds (0 disables).
    #[arg(long, default_value_t = 300, env = "STDIOGATE_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Seconds a session may go without a stream or client traffic before it
    /// is closed (0 disables).
    #[arg(long, default_value_t = 300, env = "STDIOGATE_SESSION_IDLE_TIMEOUT_SECS")]
    pub session_idle_timeout_secs: u64,

    /// Consecutive child restarts before giving up.
    #[arg(long, default_value_t = 5, env = "STDIOGATE_MAX_RESTARTS")]
    pub max_restarts: u32,

    /// First restart delay in milliseconds (doubles per attempt).
    #[arg(long, default_value_t = 100, env = "STDIOGATE_RESTART_BACKOFF_MS")]
    pub restart_backoff_ms: u64,

    /// Upper bound on the restart delay in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "STDIOGATE_RESTART_BACKOFF_MAX_MS")]
    pub restart_backoff_max_ms: u64,

    /// Uptime in seconds after which a child's restart counter resets.
    #[arg(long, default_value_t = 60, env = "STDIOGATE_RESTART_RESET_SECS")]
    pub restart_reset_secs: u64,

    /// Wait after closing the child's stdin before SIGTERM, in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "STDIOGATE_STDIN_CLOSE_GRACE_MS")]
    pub stdin_close_grace_ms: u64,

    /// Wait after SIGTERM before SIGKILL, in milliseconds.
    #[arg(long, default_value_t = 2_000, env = "STDIOGATE_SIGTERM_GRACE_MS")]
    pub sigterm_grace_ms: u64,

    /// Notification fan-out policy.
    #[arg(long, value_enum, default_value = "broadcast", env = "STDIOGATE_NOTIFICATION_POLICY")]
    pub notification_policy: NotificationPolicy,

    /// Key under `params._meta` naming the target session of a notification.
    #[arg(long, default_value = "sessionId", env = "STDIOGATE_SESSION_MARKER_KEY")]
    pub session_marker_key: String,

    /// SSE keep-alive interval in seconds.
    #[arg(long, default_value_t = 15, env = "STDIOGATE_KEEP_ALIVE_SECS")]
    pub keep_alive_secs: u64,

    /// Log format written to stderr.
    #[arg(long, value_enum, default_value = "json", env = "STDIOGATE_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Enable debug logging (overrides RUST_LOG).
    #[arg(long, short)]
    pub verbose: bool,

    /// Tool-provider command and arguments (after `--`).
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Build and validate the gateway configuration.
    pub fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let command = ChildCommand::from_argv(self.command)?;
        let config = GatewayConfig {
            transport: self.transport,
            bind: self.bind,
            port: self.port,
            path: self.path,
            command,
            session_queue_capacity: self.session_queue,
            max_sessions: self.max_sessions,
            max_body_bytes: self.max_body_bytes,
            request_timeout: (self.request_timeout_secs > 0)
                .then(|| Duration::from_secs(self.request_timeout_secs)),
            session_idle_timeout: (self.session_idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.session_idle_timeout_secs)),
            restart: RestartPolicy {
                max_restarts: self.max_restarts,
                initial_backoff: Duration::from_millis(self.restart_backoff_ms),
                max_backoff: Duration::from_millis(self.restart_backoff_max_ms),
                reset_after: Duration::from_secs(self.restart_reset_secs),
            },
            grace: ShutdownGrace {
                stdin_close_grace: Duration::from_millis(self.stdin_close_grace_ms),
                sigterm_grace: Duration::from_millis(self.sigterm_grace_ms),
            },
            notification_policy: self.notification_policy,
            session_marker_key: self.session_marker_key,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
        };
        config.validate()?;
        Ok(config)
    }
}
