//! Error taxonomy shared by the job queue and the reply pool.

use thiserror::Error;

use crate::{JobId, JobState};

/// Errors surfaced by queue and pool operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Malformed input; rejected before any mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The target record does not exist on this path.
    #[error("Job not found on {path}: {id}")]
    NotFound { path: String, id: String },

    /// Completing a job that is not currently Processing.
    #[error("Job {id} is {state}, expected processing")]
    ProtocolViolation { id: JobId, state: JobState },

    /// Retries ran out while racing other claimants.
    #[error("Contention on {path} not resolved after {attempts} attempts")]
    ContentionExhausted { path: String, attempts: u32 },

    /// No free reply slot appeared within the retry budget.
    #[error("Reply pool {path} has no free slot after {attempts} attempts")]
    PoolExhausted { path: String, attempts: u32 },

    /// Fatal backend failure; the operation left no partial change behind.
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl RpcError {
    /// Expected under load; callers may back off and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::ContentionExhausted { .. } | RpcError::PoolExhausted { .. }
        )
    }

    /// Storage failures are never retried automatically.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RpcError::Storage(_))
    }
}

/// Result type for queue operations.
pub type RpcResult<T> = Result<T, RpcError>;
