//! One child process incarnation.

use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Instant;

use tokio::process::{Child, ChildStdout, Command};

use crate::config::{ChildCommand, ShutdownGrace};
use crate::error::SpawnError;
use crate::framing::FrameWriter;

/// How a child incarnation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Exited { code: i32 },
    Signalled { signal: i32 },
    /// `wait()` itself failed; the status is unknown.
    Unknown,
}

impl ChildExit {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited { code };
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signalled { signal };
            }
        }
        Self::Unknown
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exited with code {code}"),
            Self::Signalled { signal } => write!(f, "killed by signal {signal}"),
            Self::Unknown => write!(f, "exited with unknown status"),
        }
    }
}

/// A running child with its stdio captured.
///
/// stdin is owned by a shared [`FrameWriter`]; stdout is taken once by the
/// reader task. stderr is inherited.
pub struct ChildProcess {
    child: Child,
    writer: Arc<FrameWriter>,
    stdout: Option<ChildStdout>,
    pid: Option<u32>,
    started_at: Instant,
}

impl ChildProcess {
    /// Launch the child in its own process group.
    pub fn start(command: &ChildCommand) -> Result<Self, SpawnError> {
        let spawn_error = |source| SpawnError {
            program: command.program.clone(),
            source,
        };

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(spawn_error)?;
        let stdin = child.stdin.take().ok_or_else(|| {
            spawn_error(std::io::Error::other("child stdin was not captured"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_error(std::io::Error::other("child stdout was not captured"))
        })?;
        let pid = child.id();

        tracing::info!(program = %command.program, pid, state = "running", "child started");
        Ok(Self {
            child,
            writer: Arc::new(FrameWriter::new(stdin)),
            stdout: Some(stdout),
            pid,
            started_at: Instant::now(),
        })
    }

    pub fn writer(&self) -> Arc<FrameWriter> {
        self.writer.clone()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Resolve when the child exits.
    pub async fn wait(&mut self) -> ChildExit {
        match self.child.wait().await {
            Ok(status) => ChildExit::from_status(status),
            Err(e) => {
                tracing::error!(pid = self.pid, error = %e, "wait on child failed");
                ChildExit::Unknown
            }
        }
    }

    /// Graceful termination, always reaping the child.
    ///
    /// 1. Close stdin and wait `stdin_close_grace`
    /// 2. SIGTERM the process group (Unix) and wait `sigterm_grace`
    /// 3. SIGKILL
    /// 4. Collect the exit status
    pub async fn stop(&mut self, grace: &ShutdownGrace) -> ChildExit {
        let pid = self.pid;
        tracing::info!(pid, state = "shutting_down", "stopping child");

        self.writer.close().await;
        if let Ok(status) = tokio::time::timeout(grace.stdin_close_grace, self.child.wait()).await {
            let exit = status.map_or(ChildExit::Unknown, ChildExit::from_status);
            tracing::info!(pid, %exit, state = "stopped", "child exited after stdin close");
            return exit;
        }
        tracing::info!(pid, "child did not exit within stdin_close_grace");

        #[cfg(unix)]
        if let Some(pid) = pid {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;
            tracing::info!(pid, "sending SIGTERM to process group");
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::warn!(pid, error = ?e, "killpg SIGTERM failed");
            }
        }

        if let Ok(status) = tokio::time::timeout(grace.sigterm_grace, self.child.wait()).await {
            let exit = status.map_or(ChildExit::Unknown, ChildExit::from_status);
            tracing::info!(pid, %exit, state = "stopped", "child exited after SIGTERM");
            return exit;
        }

        tracing::warn!(pid, "child ignored SIGTERM, sending SIGKILL");
        if let Err(e) = self.child.kill().await {
            tracing::error!(pid, error = %e, "SIGKILL failed");
        }
        let exit = self.wait().await;
        tracing::info!(pid, %exit, state = "stopped", "child exited after SIGKILL");
        exit
    }
}
