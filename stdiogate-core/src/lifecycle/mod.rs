//! Operational lifecycle of the gateway process.
//!
//! ```text
//! Starting → Ready → ShuttingDown → Stopped
//! ```
//!
//! - **Starting**: child spawned, listener not yet serving
//! - **Ready**: accepting sessions
//! - **ShuttingDown**: signal received or restarts exhausted; new work refused
//! - **Stopped**: child reaped, server drained
//!
//! The manager also owns the process-wide shutdown [`CancellationToken`] and
//! tracks whether a child incarnation is currently running, which feeds the
//! readiness probe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod health;

pub use health::{HealthResponse, ReadinessChecks, ReadinessResponse, health_router};

/// Lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Central coordination point for the gateway's lifecycle.
///
/// Safe for concurrent access; all state is atomic or lock-free.
pub struct LifecycleManager {
    state: ArcSwap<LifecycleState>,
    started_at: Instant,
    shutdown_token: CancellationToken,
    child_running: AtomicBool,
    /// Number of child incarnations started (1 after the first spawn).
    child_incarnations: AtomicU32,
    version: &'static str,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    /// Creates a new lifecycle manager in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::new(Arc::new(LifecycleState::Starting)),
            started_at: Instant::now(),
            shutdown_token: CancellationToken::new(),
            child_running: AtomicBool::new(false),
            child_incarnations: AtomicU32::new(0),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), LifecycleState::Ready)
    }

    /// Returns true if the gateway is shutting down or stopped.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::ShuttingDown | LifecycleState::Stopped
        )
    }

    /// Transition to Ready. Ignored once shutdown has begun.
    pub fn mark_ready(&self) {
        if self.is_shutting_down() {
            return;
        }
        self.state.store(Arc::new(LifecycleState::Ready));
        info!(
            version = %self.version,
            startup_duration_ms = self.started_at.elapsed().as_millis(),
            "stdiogate ready"
        );
    }

    /// Record that a child incarnation started.
    pub fn child_started(&self) {
        self.child_incarnations.fetch_add(1, Ordering::SeqCst);
        self.child_running.store(true, Ordering::SeqCst);
    }

    /// Record that the current child incarnation is gone.
    pub fn child_stopped(&self) {
        self.child_running.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_child_running(&self) -> bool {
        self.child_running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn child_incarnations(&self) -> u32 {
        self.child_incarnations.load(Ordering::SeqCst)
    }

    /// Returns a clone of the shutdown token.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Begin graceful shutdown: flip to ShuttingDown and cancel the token.
    pub fn begin_shutdown(&self) {
        if self.is_shutting_down() {
            return;
        }
        self.state.store(Arc::new(LifecycleState::ShuttingDown));
        self.shutdown_token.cancel();
        info!(
            uptime_seconds = self.uptime_seconds(),
            "Shutdown initiated"
        );
    }

    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }

    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    #[must_use]
    pub fn version(&self) -> &'static str {
        self.version
    }

    #[must_use]
    pub fn readiness_checks(&self) -> ReadinessChecks {
        ReadinessChecks {
            child_running: self.is_child_running(),
        }
    }
}
