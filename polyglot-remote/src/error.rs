use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use polyglot_core::{FailureKind, TranslateError};

/// Error surface for SSH transport, transfer and the parity protocol.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] polyglot_core::ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] polyglot_sync::SyncError),

    #[error("failed to connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("no usable SSH auth method for {username}@{host} (need a readable private key or a password)")]
    NoAuthMethod { username: String, host: String },

    #[error("SSH authentication failed for {username}@{host}")]
    AuthFailed { username: String, host: String },

    #[error("worker is not connected")]
    NotConnected,

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("command timed out after {after:?}: {command}")]
    Timeout { command: String, after: Duration },

    #[error("remote operation cancelled")]
    Cancelled,

    #[error("remote command `{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("upload to {path} failed at chunk {chunk}/{total}: {message}")]
    ChunkFailed {
        path: String,
        chunk: usize,
        total: usize,
        message: String,
    },

    #[error("unexpected remote output: {0}")]
    Protocol(String),

    #[error("codebase drift could not be repaired (local {local}, remote {remote})")]
    DriftUnrepairable { local: String, remote: String },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RemoteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RemoteError::Cancelled => FailureKind::Cancelled,
            RemoteError::DriftUnrepairable { .. } => FailureKind::DriftUnrepairable,
            RemoteError::CommandFailed { .. } => FailureKind::Provider,
            _ => FailureKind::Transport,
        }
    }
}

impl From<RemoteError> for TranslateError {
    fn from(err: RemoteError) -> Self {
        match err.kind() {
            FailureKind::Cancelled => TranslateError::Cancelled,
            FailureKind::Provider => TranslateError::provider(err.to_string()),
            _ => TranslateError::transport(err.to_string()),
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RemoteError {
    RemoteError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn ssh_err(err: ssh2::Error) -> RemoteError {
    RemoteError::Ssh(err.to_string())
}
