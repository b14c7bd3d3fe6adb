//! Error types for polyglot-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from hashing or packaging a source tree.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Symlinks make the digest host-dependent, so they abort hashing.
    #[error("symlink in hashed tree: {path}")]
    Symlink { path: PathBuf },

    /// Non-UTF-8 or newline-bearing names cannot be framed identically on
    /// both sides.
    #[error("unsupported path in hashed tree: {path}")]
    UnsupportedPath { path: PathBuf },

    /// `git archive` / `tar` failed.
    #[error("archive command `{command}` failed: {message}")]
    Archive { command: String, message: String },

    /// Nothing under the tree matched the hash spec.
    #[error("nothing to package under {root}")]
    EmptyTree { root: PathBuf },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
