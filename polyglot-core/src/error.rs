//! Error types for polyglot-core.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse failure classes surfaced to callers of the coordination core.
///
/// Retry logic branches on these instead of matching error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Pool empty or exhausted.
    NoInstancesAvailable,
    /// Connection, authentication or timeout below the backend.
    Transport,
    /// The backend itself rejected or failed the request.
    Provider,
    /// Enough instances answered but did not agree.
    ConsensusFailure,
    /// Local and remote digests still differ after repair.
    DriftUnrepairable,
    /// The caller cancelled the operation.
    Cancelled,
}

/// All errors that can arise from configuration load / save.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with the path that was being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A value parsed but is outside its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// Failure of a single backend call.
#[derive(Debug, Clone, Error)]
pub enum TranslateError {
    /// SSH, HTTP connect, process spawn, or timeout failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered but refused or failed the request.
    #[error("provider error: {0}")]
    Provider(String),

    /// The call was cancelled before the backend answered.
    #[error("translation cancelled")]
    Cancelled,

    /// A pool-level failure (empty pool, exhausted retries, disagreement)
    /// reported through the single-backend interface.
    #[error("{message}")]
    Coordination { kind: FailureKind, message: String },
}

impl TranslateError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            TranslateError::Transport(_) => FailureKind::Transport,
            TranslateError::Provider(_) => FailureKind::Provider,
            TranslateError::Cancelled => FailureKind::Cancelled,
            TranslateError::Coordination { kind, .. } => *kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_error_kinds_are_distinct() {
        assert_eq!(
            TranslateError::transport("refused").kind(),
            FailureKind::Transport
        );
        assert_eq!(
            TranslateError::provider("429").kind(),
            FailureKind::Provider
        );
        assert_eq!(TranslateError::Cancelled.kind(), FailureKind::Cancelled);
        assert_eq!(
            TranslateError::Coordination {
                kind: FailureKind::ConsensusFailure,
                message: "no agreement".into(),
            }
            .kind(),
            FailureKind::ConsensusFailure
        );
    }

    #[test]
    fn io_error_message_carries_path() {
        let err = io_err(
            "/tmp/config.yaml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/config.yaml"));
    }
}
