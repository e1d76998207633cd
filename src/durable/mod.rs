//! Durable workflow execution
//!
//! A workflow is an async function that schedules activities through a
//! [`WorkflowContext`]. Every completed activity outcome is written to a
//! sequence-numbered history; when a run is executed again (redelivery after a
//! crash, or a restart) recorded outcomes are replayed instead of re-running
//! side effects.
//!
//! Two engines implement [`WorkflowEngine`]:
//! - [`LocalEngine`]: runs on spawned tasks inside the current process
//! - [`JetStreamEngine`]: claims the run identity in a NATS key-value bucket and
//!   hands the run to a [`crate::worker::WorkflowWorker`] through a stream

pub mod activity;
pub mod history;
pub mod jetstream;
pub mod local;
pub mod registry;

pub use activity::{ActivityContext, WorkflowContext};
pub use history::{HistoryEvent, HistoryStore, MemoryHistory};
pub use jetstream::{JetStreamEngine, JetStreamHistory, WorkflowTask};
pub use local::LocalEngine;
pub use registry::{Workflow, WorkflowRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::domain::PetError;
use crate::pets::types::IdempotencyRecord;
use crate::types::{PetstoreError, Result};

/// Exponential backoff between activity attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    /// Total attempts including the first; 0 means unlimited
    pub maximum_attempts: u32,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based)
    pub fn interval_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = secs.min(self.maximum_interval.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        self.maximum_attempts != 0 && attempt >= self.maximum_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(100),
            maximum_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityOptions {
    /// Upper bound for a single attempt
    pub start_to_close_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartWorkflowOptions {
    /// Run identity; a second start with the same id is rejected
    pub id: String,
    pub task_queue: String,
}

/// Serializable failure that crosses the durable boundary
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    Validation { error: PetError },
    BadRequest { message: String },
    NotFound { pet_id: i64 },
    Conflict { key: String, existing: IdempotencyRecord },
    Partner { message: String },
    Timeout { message: String },
    Database { message: String },
    Nats { message: String },
    Workflow { message: String },
    Internal { message: String },
}

impl Failure {
    pub fn internal(message: impl Into<String>) -> Self {
        Failure::Internal {
            message: message.into(),
        }
    }
}

impl From<&PetstoreError> for Failure {
    fn from(err: &PetstoreError) -> Self {
        match err {
            PetstoreError::Validation(error) => Failure::Validation {
                error: error.clone(),
            },
            PetstoreError::BadRequest(message) => Failure::BadRequest {
                message: message.clone(),
            },
            PetstoreError::NotFound(pet_id) => Failure::NotFound { pet_id: *pet_id },
            PetstoreError::IdempotencyConflict { key, existing } => Failure::Conflict {
                key: key.clone(),
                existing: existing.as_ref().clone(),
            },
            PetstoreError::Partner(message) => Failure::Partner {
                message: message.clone(),
            },
            PetstoreError::PartnerSync { message, .. } => Failure::Partner {
                message: message.clone(),
            },
            PetstoreError::Timeout(message) => Failure::Timeout {
                message: message.clone(),
            },
            PetstoreError::Database(message) => Failure::Database {
                message: message.clone(),
            },
            PetstoreError::Nats(message) => Failure::Nats {
                message: message.clone(),
            },
            PetstoreError::Workflow(message) => Failure::Workflow {
                message: message.clone(),
            },
            other => Failure::internal(other.to_string()),
        }
    }
}

impl From<Failure> for PetstoreError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Validation { error } => PetstoreError::Validation(error),
            Failure::BadRequest { message } => PetstoreError::BadRequest(message),
            Failure::NotFound { pet_id } => PetstoreError::NotFound(pet_id),
            Failure::Conflict { key, existing } => PetstoreError::IdempotencyConflict {
                key,
                existing: Box::new(existing),
            },
            Failure::Partner { message } => PetstoreError::Partner(message),
            Failure::Timeout { message } => PetstoreError::Timeout(message),
            Failure::Database { message } => PetstoreError::Database(message),
            Failure::Nats { message } => PetstoreError::Nats(message),
            Failure::Workflow { message } => PetstoreError::Workflow(message),
            Failure::Internal { message } => PetstoreError::Internal(message),
        }
    }
}

/// Terminal result of a workflow run.
///
/// `result` and `failure` may both be set: the run produced a value and then
/// failed a later step.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct WorkflowOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl WorkflowOutcome {
    pub fn completed(result: Value) -> Self {
        Self {
            result: Some(result),
            failure: None,
        }
    }

    pub fn failed(failure: Failure) -> Self {
        Self {
            result: None,
            failure: Some(failure),
        }
    }

    pub fn partial(result: Value, failure: Failure) -> Self {
        Self {
            result: Some(result),
            failure: Some(failure),
        }
    }
}

/// Awaits the outcome of one run
#[async_trait]
pub trait RunHandle: Send + Sync {
    async fn outcome(&self) -> Result<WorkflowOutcome>;
}

/// Handle to a started or existing run
pub struct WorkflowRun {
    workflow_id: String,
    handle: Box<dyn RunHandle>,
}

impl WorkflowRun {
    pub fn new(workflow_id: impl Into<String>, handle: Box<dyn RunHandle>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            handle,
        }
    }

    pub fn id(&self) -> &str {
        &self.workflow_id
    }

    /// Wait for the run to finish
    pub async fn get(&self) -> Result<WorkflowOutcome> {
        self.handle.outcome().await
    }
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start a run of the named workflow.
    ///
    /// Fails with `PetstoreError::WorkflowAlreadyStarted` when a run with the
    /// same id exists, whatever its state.
    async fn execute_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow: &str,
        input: Value,
    ) -> Result<WorkflowRun>;

    /// Handle to an existing run
    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowRun>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_secs(2),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(10),
            maximum_attempts: 5,
        };
        assert_eq!(policy.interval_for(1), Duration::from_secs(2));
        assert_eq!(policy.interval_for(2), Duration::from_secs(4));
        assert_eq!(policy.interval_for(3), Duration::from_secs(8));
        assert_eq!(policy.interval_for(4), Duration::from_secs(10));
        assert_eq!(policy.interval_for(400), Duration::from_secs(10));
        assert!(!policy.attempts_exhausted(4));
        assert!(policy.attempts_exhausted(5));
    }

    #[test]
    fn unlimited_attempts_never_exhaust() {
        let policy = RetryPolicy::default();
        assert!(!policy.attempts_exhausted(10_000));
    }

    #[test]
    fn failures_keep_their_kind_across_the_boundary() {
        let err = PetstoreError::Validation(PetError::EmptyName);
        let json = serde_json::to_value(Failure::from(&err)).unwrap();
        assert_eq!(json["kind"], "validation");

        let back: Failure = serde_json::from_value(json).unwrap();
        assert!(matches!(
            PetstoreError::from(back),
            PetstoreError::Validation(PetError::EmptyName)
        ));

        let db = PetstoreError::Database("connection reset".into());
        assert!(matches!(
            PetstoreError::from(Failure::from(&db)),
            PetstoreError::Database(message) if message == "connection reset"
        ));
    }

    #[test]
    fn infrastructure_failures_are_not_flattened_to_internal() {
        let nats = Failure::from(&PetstoreError::Nats("no responders".into()));
        assert_eq!(serde_json::to_value(&nats).unwrap()["kind"], "nats");
        assert!(matches!(
            PetstoreError::from(nats),
            PetstoreError::Nats(message) if message == "no responders"
        ));

        let workflow = Failure::from(&PetstoreError::Workflow("run lost".into()));
        assert!(matches!(PetstoreError::from(workflow), PetstoreError::Workflow(_)));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(matches!(
            Failure::from(&PetstoreError::Io(io)),
            Failure::Internal { message } if message.contains("disk full")
        ));
    }
}
