use thiserror::Error;

use polyglot_core::{FailureKind, InstanceId, TranslateError};
use polyglot_remote::RemoteError;

/// Failures surfaced by the coordinator to its callers.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("no LLM instances available")]
    NoInstancesAvailable,

    #[error("translation failed after {attempts} attempt(s); last error from {instance}: {source}")]
    RetriesExhausted {
        attempts: u32,
        instance: InstanceId,
        #[source]
        source: TranslateError,
    },

    #[error(
        "consensus not reached: {agreeing} of {required} required agreed, \
         {dissenting} dissenting, {failed} failed"
    )]
    ConsensusFailure {
        required: usize,
        agreeing: usize,
        dissenting: usize,
        failed: usize,
    },

    #[error("translation cancelled")]
    Cancelled,

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("cannot determine the local codebase root: {0}")]
    CodebaseRoot(#[source] std::io::Error),
}

impl CoordinationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CoordinationError::NoInstancesAvailable | CoordinationError::UnknownWorker(_) => {
                FailureKind::NoInstancesAvailable
            }
            CoordinationError::RetriesExhausted { source, .. } => source.kind(),
            CoordinationError::ConsensusFailure { .. } => FailureKind::ConsensusFailure,
            CoordinationError::Cancelled => FailureKind::Cancelled,
            CoordinationError::Remote(err) => err.kind(),
            CoordinationError::CodebaseRoot(_) => FailureKind::Transport,
        }
    }
}

impl From<CoordinationError> for TranslateError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::Cancelled => TranslateError::Cancelled,
            CoordinationError::RetriesExhausted { source, .. } => source,
            other => TranslateError::Coordination {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}
