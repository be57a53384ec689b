//! Child process supervision.
//!
//! Provides [`ProcessSupervisor`] for launching compiled artifacts with all
//! three standard streams piped, [`ChildProcess`] for owning the running
//! child, and [`InputHandle`] for forwarding lines to its standard input.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, watch};

use crate::error::{Error, Result};
use crate::platform::ExecutionPlatform;

/// Launches artifacts on an execution platform.
#[derive(Debug, Clone, Copy)]
pub struct ProcessSupervisor {
    host_pid: u32,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            host_pid: std::process::id(),
        }
    }

    /// Override the pid passed to managed launchers.
    pub fn with_host_pid(host_pid: u32) -> Self {
        Self { host_pid }
    }

    pub fn host_pid(&self) -> u32 {
        self.host_pid
    }

    /// Start `artifact` in `working_dir`.
    ///
    /// Native platforms execute the artifact directly. Managed platforms run
    /// `<launcher> <artifact> --pid <host pid>`.
    pub fn launch(
        &self,
        artifact: &Path,
        platform: &ExecutionPlatform,
        working_dir: &Path,
    ) -> Result<ChildProcess> {
        platform.validate()?;

        let mut cmd = if platform.is_managed {
            let launcher = platform.launcher.as_ref().ok_or_else(|| {
                Error::Configuration(format!("platform {} has no launcher", platform))
            })?;
            let mut cmd = Command::new(launcher);
            cmd.arg(artifact)
                .arg("--pid")
                .arg(self.host_pid.to_string());
            cmd
        } else {
            Command::new(artifact)
        };

        let mut child = cmd
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Process(format!(
                    "Failed to launch '{}': {}",
                    artifact.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        tracing::debug!(pid = ?child.id(), artifact = %artifact.display(), "launched");

        Ok(ChildProcess {
            child,
            input: InputHandle::new(stdin),
        })
    }
}

/// A running child. Dropping it kills the process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    input: InputHandle,
}

impl ChildProcess {
    /// OS pid, `None` once reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn input(&self) -> InputHandle {
        self.input.clone()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Forcibly terminate and reap. Failures are logged.
    ///
    /// Never waits on a pending [`InputHandle::write_line`].
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!("Failed to kill child process: {}", e);
        }
        self.input.close();
    }

    /// Wait for exit and return the exit code (-1 when killed by a signal).
    pub async fn wait(&mut self) -> Result<i32> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::Process(format!("Failed to wait for child: {}", e)))?;
        self.input.close();
        Ok(status.code().unwrap_or(-1))
    }
}

/// Writes lines to a child's standard input.
///
/// Writes after the child exits or after the pipe closes are dropped. A
/// write blocked on a full pipe is abandoned once the handle is closed.
#[derive(Debug, Clone)]
pub struct InputHandle {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl InputHandle {
    fn new(stdin: Option<ChildStdin>) -> Self {
        let open = stdin.is_some();
        Self {
            stdin: Arc::new(Mutex::new(stdin)),
            closed: Arc::new(watch::channel(!open).0),
        }
    }

    /// A handle with no child behind it.
    pub fn detached() -> Self {
        Self::new(None)
    }

    pub async fn write_line(&self, line: &str) {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            tracing::trace!("input dropped: no child");
            return;
        }

        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');

        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => {
                tracing::trace!("input dropped: handle closed");
                self.release();
            }
            _ = self.write_locked(&data) => {}
        }
    }

    async fn write_locked(&self, data: &[u8]) {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return;
        };
        let written = async {
            stdin.write_all(data).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::debug!("input pipe closed: {}", e);
            *guard = None;
        }
    }

    pub async fn is_open(&self) -> bool {
        !*self.closed.borrow() && self.stdin.lock().await.is_some()
    }

    /// Stop accepting input and wake blocked writers.
    fn close(&self) {
        self.closed.send_replace(true);
        self.release();
    }

    /// Drop the pipe unless a writer still holds it; that writer drops it
    /// when it observes the close.
    fn release(&self) {
        if let Ok(mut guard) = self.stdin.try_lock() {
            guard.take();
        }
    }
}
