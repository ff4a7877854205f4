// Server child process: spawn, stderr capture, graceful shutdown

use crate::config::ServerCommand;
use crate::error::{McpError, McpResult};
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Lines of server stderr kept for diagnostics
const STDERR_TAIL_LINES: usize = 50;

/// A running server process owned by the client.
///
/// The child is killed if this is dropped without `shutdown`.
pub struct ServerProcess {
    child: Child,
    program: String,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ServerProcess {
    /// Launch the server with piped stdio; returns the pipes the client talks over
    pub fn spawn(command: &ServerCommand) -> McpResult<(Self, ChildStdin, ChildStdout)> {
        let program = command.program.display().to_string();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            tracing::error!(program = %program, error = %e, "Failed to spawn server");
            McpError::Process(e)
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::PeerUnavailable("server stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::PeerUnavailable("server stdout not captured".to_string()))?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(stderr, program.clone(), stderr_tail.clone())));

        tracing::info!(program = %program, pid = ?child.id(), "Spawned server process");

        Ok((
            Self {
                child,
                program,
                stderr_tail,
                stderr_task,
            },
            stdin,
            stdout,
        ))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status if the process already ended
    pub fn try_status(&mut self) -> McpResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Most recent stderr lines, oldest first
    pub fn stderr_tail(&self) -> Vec<String> {
        match self.stderr_tail.lock() {
            Ok(tail) => tail.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Wait for the process to exit, killing it after `timeout`.
    ///
    /// The caller closes the server's stdin first so it sees end of stream.
    pub async fn shutdown(mut self, timeout: Duration) -> McpResult<ExitStatus> {
        let status = match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    timeout_ms = timeout.as_millis() as u64,
                    "Server did not exit in time, killing it"
                );
                self.child.kill().await?;
                self.child.wait().await?
            }
        };

        if let Some(task) = self.stderr_task.take() {
            // stderr closes with the process; don't hang on a grandchild holding it
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }

        if status.success() {
            tracing::info!(program = %self.program, "Server exited");
        } else {
            tracing::warn!(program = %self.program, status = %status, "Server exited with failure");
        }
        Ok(status)
    }
}

async fn drain_stderr(stderr: ChildStderr, program: String, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(server = %program, "{}", line);
                let mut tail = match tail.lock() {
                    Ok(tail) => tail,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %program, error = %e, "Stopped reading server stderr");
                break;
            }
        }
    }
}
