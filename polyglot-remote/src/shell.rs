//! The command-execution seam shared by the SSH worker and local harnesses.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{io_err, RemoteError};

/// Outcome of one command.
///
/// `error` records a transport problem observed after the command started
/// (for example a broken stream), which is distinct from a non-zero exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }

    /// stdout followed by stderr.
    pub fn output(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }

    fn into_checked(self, command: &str) -> Result<CommandResult, RemoteError> {
        if self.success() {
            return Ok(self);
        }
        let stderr = match &self.error {
            Some(err) => err.clone(),
            None => self.stderr.trim().to_string(),
        };
        Err(RemoteError::CommandFailed {
            command: command.to_string(),
            exit_code: self.exit_code,
            stderr,
        })
    }
}

/// Executes shell command lines somewhere, honouring cancellation.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Working directory on the far side; transfer and parity commands
    /// are built relative to it.
    fn remote_dir(&self) -> &str;

    /// Short label for logs.
    fn label(&self) -> String;

    async fn execute(
        &self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<CommandResult, RemoteError>;

    /// Like [`execute`](RemoteShell::execute) but a non-zero exit is an error.
    async fn execute_checked(
        &self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<CommandResult, RemoteError> {
        self.execute(cancel, command).await?.into_checked(command)
    }
}

/// Runs commands under `sh -c` on this host, with `dir` standing in for the
/// remote working directory.
#[derive(Debug, Clone)]
pub struct LocalShell {
    dir: String,
    timeout: Option<Duration>,
}

impl LocalShell {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into().to_string_lossy().into_owned(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl RemoteShell for LocalShell {
    fn remote_dir(&self) -> &str {
        &self.dir
    }

    fn label(&self) -> String {
        format!("local:{}", self.dir)
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<CommandResult, RemoteError> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| io_err(&self.dir, e))?;

        let deadline = async {
            match self.timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending().await,
            }
        };

        let output = tokio::select! {
            out = child.wait_with_output() => out.map_err(|e| io_err(&self.dir, e))?,
            _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
            _ = deadline => {
                return Err(RemoteError::Timeout {
                    command: command.to_string(),
                    after: self.timeout.unwrap_or_default(),
                })
            }
        };

        Ok(CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            error: None,
        })
    }
}
