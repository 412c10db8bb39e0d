//! Child process supervision.
//!
//! [`ChildSupervisor`] owns the single child process. It wires each new
//! incarnation into the [`MessageRouter`], watches for exit or a broken
//! stdin, fails in-flight requests when the child goes away, and restarts it
//! under a bounded exponential-backoff policy. On shutdown it stops the child
//! with the stdin-close → SIGTERM → SIGKILL escalation.

mod process;

pub use process::{ChildExit, ChildProcess};

use std::sync::Arc;
use std::time::Duration;

use stdiogate_core::lifecycle::LifecycleManager;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ChildCommand, RestartPolicy, ShutdownGrace};
use crate::error::{SpawnError, SupervisorError};
use crate::framing::FrameReader;
use crate::router::{CloseReason, MessageRouter};

/// How long to let the stdout reader drain after the child exits, so that
/// responses written just before exit are still delivered.
const READER_DRAIN: Duration = Duration::from_millis(500);

/// A running child together with the tasks that serve it.
pub struct Incarnation {
    process: ChildProcess,
    broken: CancellationToken,
    reader: JoinHandle<()>,
}

impl Incarnation {
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }
}

enum ChildEvent {
    Shutdown,
    Exited(ChildExit),
    StdinBroken,
}

pub struct ChildSupervisor {
    command: ChildCommand,
    restart: RestartPolicy,
    grace: ShutdownGrace,
    router: Arc<MessageRouter>,
    lifecycle: Arc<LifecycleManager>,
}

impl ChildSupervisor {
    pub fn new(
        command: ChildCommand,
        restart: RestartPolicy,
        grace: ShutdownGrace,
        router: Arc<MessageRouter>,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            command,
            restart,
            grace,
            router,
            lifecycle,
        }
    }

    /// Spawn a child and connect it to the router.
    pub fn launch(&self) -> Result<Incarnation, SpawnError> {
        let mut process = ChildProcess::start(&self.command)?;
        let broken = self.router.attach_child(process.writer());

        let stdout = process.take_stdout();
        let router = self.router.clone();
        let reader = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                router.run_reader(FrameReader::new(stdout)).await;
            }
        });

        self.lifecycle.child_started();
        Ok(Incarnation {
            process,
            broken,
            reader,
        })
    }

    /// Supervise `current` until shutdown or restart exhaustion.
    ///
    /// Returns `Ok(())` after a graceful stop. On exhaustion every session
    /// has already been failed and closed.
    pub async fn run(
        self,
        mut current: Incarnation,
        shutdown: CancellationToken,
    ) -> Result<(), SupervisorError> {
        let mut attempts: u32 = 0;

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => ChildEvent::Shutdown,
                exit = current.process.wait() => ChildEvent::Exited(exit),
                _ = current.broken.cancelled() => ChildEvent::StdinBroken,
            };

            let reason = match event {
                ChildEvent::Shutdown => {
                    self.router.detach_child();
                    current.process.stop(&self.grace).await;
                    self.retire(current, "gateway shutting down").await;
                    self.router.close_all(CloseReason::Shutdown);
                    return Ok(());
                }
                ChildEvent::Exited(exit) => {
                    warn!(pid = current.pid(), %exit, "child exited unexpectedly");
                    exit.to_string()
                }
                ChildEvent::StdinBroken => {
                    warn!(pid = current.pid(), "child stdin closed, restarting child");
                    self.router.detach_child();
                    let exit = current.process.stop(&self.grace).await;
                    format!("child stdin closed ({exit})")
                }
            };

            if current.process.uptime() >= self.restart.reset_after {
                attempts = 0;
            }
            self.retire(current, &reason).await;

            current = match self.relaunch(&mut attempts, &shutdown).await {
                Some(Ok(next)) => next,
                Some(Err(err)) => {
                    self.router.close_all(CloseReason::Shutdown);
                    return Err(err);
                }
                None => {
                    self.router.close_all(CloseReason::Shutdown);
                    return Ok(());
                }
            };
        }
    }

    /// Let the stdout reader drain, then fail whatever is still pending.
    async fn retire(&self, mut incarnation: Incarnation, reason: &str) {
        self.lifecycle.child_stopped();
        if tokio::time::timeout(READER_DRAIN, &mut incarnation.reader)
            .await
            .is_err()
        {
            incarnation.reader.abort();
        }
        self.router.child_exited(reason);
    }

    /// Restart with backoff. `None` means shutdown was requested meanwhile.
    async fn relaunch(
        &self,
        attempts: &mut u32,
        shutdown: &CancellationToken,
    ) -> Option<Result<Incarnation, SupervisorError>> {
        loop {
            if *attempts >= self.restart.max_restarts {
                error!(attempts = *attempts, "child restart limit reached");
                return Some(Err(SupervisorError::RestartsExhausted {
                    attempts: *attempts,
                }));
            }
            *attempts += 1;
            self.router.metrics().child_restarts_total.inc();

            let delay = self.restart.backoff(*attempts);
            info!(
                attempt = *attempts,
                max_restarts = self.restart.max_restarts,
                delay_ms = delay.as_millis() as u64,
                "restarting child"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.launch() {
                Ok(next) => return Some(Ok(next)),
                Err(e) => warn!(attempt = *attempts, error = %e, "child restart failed"),
            }
        }
    }
}
