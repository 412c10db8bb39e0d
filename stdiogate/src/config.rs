//! Validated gateway configuration.
//!
//! [`GatewayConfig`] is what the rest of the crate consumes. The CLI
//! ([`crate::cli::Cli`]) converts into it; tests and embedders build it
//! directly with [`GatewayConfig::new`] and adjust fields.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::ValueEnum;

use crate::error::ConfigError;
use crate::framing::MAX_MESSAGE_BYTES;

/// Paths served by the gateway itself; the MCP endpoint may not shadow them.
const RESERVED_PATHS: [&str; 4] = ["/", "/health", "/ready", "/metrics"];

/// How a session's response stream is framed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    /// `text/event-stream`, one `message` event per JSON-RPC message.
    Sse,
    /// Chunked `application/x-ndjson`, one JSON-RPC message per line.
    Ndjson,
}

/// Which sessions receive a notification emitted by the child.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum NotificationPolicy {
    /// Every open session.
    Broadcast,
    /// Only the session named by the notification's marker, when present;
    /// unmarked notifications are still broadcast.
    Scoped,
}

/// The tool-provider command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ChildCommand {
    /// Split `argv` into program and arguments.
    pub fn from_argv(argv: Vec<String>) -> Result<Self, ConfigError> {
        let mut iter = argv.into_iter();
        let program = iter
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or(ConfigError::MissingCommand)?;
        Ok(Self {
            program,
            args: iter.collect(),
        })
    }
}

/// Bounded restart policy with exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Consecutive restart attempts allowed before giving up.
    pub max_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// An incarnation that stays up this long resets the attempt counter.
    pub reset_after: Duration,
}

impl RestartPolicy {
    /// Delay before restart attempt `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            reset_after: Duration::from_secs(60),
        }
    }
}

/// Escalation timings for stopping the child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownGrace {
    /// Wait after closing stdin before sending SIGTERM.
    pub stdin_close_grace: Duration,
    /// Wait after SIGTERM before sending SIGKILL.
    pub sigterm_grace: Duration,
}

impl Default for ShutdownGrace {
    fn default() -> Self {
        Self {
            stdin_close_grace: Duration::from_secs(5),
            sigterm_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub transport: TransportMode,
    pub bind: IpAddr,
    /// 0 asks the OS for an ephemeral port.
    pub port: u16,
    pub path: String,
    pub command: ChildCommand,
    pub session_queue_capacity: usize,
    pub max_sessions: usize,
    pub max_body_bytes: usize,
    /// `None` disables the per-request timeout.
    pub request_timeout: Option<Duration>,
    /// Close sessions that never attached a stream after this long without
    /// client activity. `None` keeps them until `DELETE`.
    pub session_idle_timeout: Option<Duration>,
    pub restart: RestartPolicy,
    pub grace: ShutdownGrace,
    pub notification_policy: NotificationPolicy,
    pub session_marker_key: String,
    pub keep_alive: Duration,
}

impl GatewayConfig {
    /// Defaults for everything except the child command.
    pub fn new(command: ChildCommand) -> Self {
        Self {
            transport: TransportMode::Sse,
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8000,
            path: "/mcp".to_string(),
            command,
            session_queue_capacity: 256,
            max_sessions: 1024,
            max_body_bytes: MAX_MESSAGE_BYTES,
            request_timeout: Some(Duration::from_secs(300)),
            session_idle_timeout: Some(Duration::from_secs(300)),
            restart: RestartPolicy::default(),
            grace: ShutdownGrace::default(),
            notification_policy: NotificationPolicy::Broadcast,
            session_marker_key: "sessionId".to_string(),
            keep_alive: Duration::from_secs(15),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// JSON pointer to the session marker inside a notification.
    pub fn marker_pointer(&self) -> String {
        let escaped = self.session_marker_key.replace('~', "~0").replace('/', "~1");
        format!("/params/_meta/{escaped}")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.program.trim().is_empty() {
            return Err(ConfigError::MissingCommand);
        }
        if !self.path.starts_with('/') || RESERVED_PATHS.contains(&self.path.as_str()) {
            return Err(ConfigError::InvalidPath {
                path: self.path.clone(),
            });
        }
        let key = &self.session_marker_key;
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidMarkerKey { key: key.clone() });
        }

        let positives: [(&'static str, bool); 6] = [
            ("session_queue_capacity", self.session_queue_capacity > 0),
            ("max_sessions", self.max_sessions > 0),
            ("max_body_bytes", self.max_body_bytes > 0),
            ("stdin_close_grace", !self.grace.stdin_close_grace.is_zero()),
            ("sigterm_grace", !self.grace.sigterm_grace.is_zero()),
            ("keep_alive", !self.keep_alive.is_zero()),
        ];
        if let Some(&(field, _)) = positives.iter().find(|&&(_, ok)| !ok) {
            return Err(ConfigError::MustBePositive { field });
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::MustBePositive {
                field: "request_timeout",
            });
        }
        if self.session_idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::MustBePositive {
                field: "session_idle_timeout",
            });
        }
        if self.restart.initial_backoff > self.restart.max_backoff {
            return Err(ConfigError::BackoffOrder {
                initial_ms: self.restart.initial_backoff.as_millis() as u64,
                max_ms: self.restart.max_backoff.as_millis() as u64,
            });
        }
        Ok(())
    }
}
