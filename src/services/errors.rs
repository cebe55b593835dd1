use thiserror::Error;

use crate::db::types::ErrorKind;
use crate::resilience::ResilientError;

/// Failure taxonomy for the whole claim pipeline. Only `TransientNetwork`
/// is retryable; everything else fails the unit of work immediately.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("portal authentication failed: {0}")]
    Auth(String),

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("submission outcome ambiguous: {0}")]
    AmbiguousOutcome(String),

    #[error("circuit open for dependency {0}")]
    CircuitOpen(String),

    #[error("poll attempts exhausted after {attempts} tries")]
    PollExhausted { attempts: i32 },

    #[error("portal rejected the operation: {0}")]
    Portal(String),

    #[error("service is shutting down, not accepting work")]
    Unavailable,
}

impl PipelineError {
    /// The persisted counterpart, recorded on the claim row. `Unavailable`
    /// rejects admission before a claim exists, so it has no kind.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PipelineError::Validation(_) => Some(ErrorKind::Validation),
            PipelineError::Extraction(_) => Some(ErrorKind::Extraction),
            PipelineError::Auth(_) => Some(ErrorKind::Auth),
            PipelineError::TransientNetwork(_) => Some(ErrorKind::TransientNetwork),
            PipelineError::AmbiguousOutcome(_) => Some(ErrorKind::AmbiguousOutcome),
            PipelineError::CircuitOpen(_) => Some(ErrorKind::CircuitOpen),
            PipelineError::PollExhausted { .. } => Some(ErrorKind::PollExhausted),
            PipelineError::Portal(_) => Some(ErrorKind::Portal),
            PipelineError::Unavailable => None,
        }
    }
}

impl ResilientError for PipelineError {
    fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::TransientNetwork(_))
    }

    fn counts_against_breaker(&self) -> bool {
        // Bad input and ambiguous outcomes say nothing about portal health.
        !matches!(
            self,
            PipelineError::Validation(_)
                | PipelineError::Extraction(_)
                | PipelineError::AmbiguousOutcome(_)
                | PipelineError::CircuitOpen(_)
                | PipelineError::Unavailable
        )
    }

    fn circuit_open(dependency: &str) -> Self {
        PipelineError::CircuitOpen(dependency.to_string())
    }
}
