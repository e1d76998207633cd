//! Shared error type for petstore

use thiserror::Error;

use crate::domain::PetError;
use crate::pets::types::{IdempotencyRecord, PetProjection};

/// Errors surfaced by the pets service, its adapters and the workflow engine
#[derive(Error, Debug)]
pub enum PetstoreError {
    /// A domain invariant was violated while building or mutating a pet
    #[error("invalid pet input: {0}")]
    Validation(#[from] PetError),

    /// The request itself could not be understood
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("pet {0} not found")]
    NotFound(i64),

    /// Same idempotency key, different payload or target pet
    #[error("idempotency conflict for key '{key}'")]
    IdempotencyConflict {
        key: String,
        existing: Box<IdempotencyRecord>,
    },

    /// The pet was persisted but the partner sync ultimately failed
    #[error("partner sync failed: {message}")]
    PartnerSync {
        projection: Box<PetProjection>,
        message: String,
    },

    #[error("partner API error: {0}")]
    Partner(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("workflow error: {0}")]
    Workflow(String),

    /// The engine could not read or record run history; the run has not settled
    #[error("workflow history unavailable: {0}")]
    HistoryUnavailable(String),

    #[error("workflow {0} already started")]
    WorkflowAlreadyStarted(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PetstoreError {
    /// Whether an activity attempt failing with this error may be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PetstoreError::Validation(_)
                | PetstoreError::BadRequest(_)
                | PetstoreError::NotFound(_)
                | PetstoreError::IdempotencyConflict { .. }
                | PetstoreError::Serialization(_)
        )
    }

    /// Failures of the engine itself rather than of the work a run performs.
    /// A run hitting one of these must be redelivered, never stored as an outcome.
    pub fn is_engine_failure(&self) -> bool {
        matches!(self, PetstoreError::HistoryUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, PetstoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!PetstoreError::Validation(PetError::EmptyName).is_retryable());
        assert!(!PetstoreError::NotFound(7).is_retryable());
        assert!(PetstoreError::Partner("502 Bad Gateway".into()).is_retryable());
        assert!(PetstoreError::Database("connection reset".into()).is_retryable());
        assert!(PetstoreError::Timeout("attempt 1".into()).is_retryable());
    }

    #[test]
    fn only_history_errors_are_engine_failures() {
        assert!(PetstoreError::HistoryUnavailable("kv put timed out".into()).is_engine_failure());
        assert!(!PetstoreError::Nats("kv put timed out".into()).is_engine_failure());
        assert!(!PetstoreError::Database("connection reset".into()).is_engine_failure());
    }
}
