//! Orchestrators behind `PetOrchestrator`
//!
//! - [`DurablePetOrchestrator`] starts a `pets.workflows.Creation` run on a
//!   [`WorkflowEngine`] and waits for its outcome. Runs started with the same
//!   identity collapse onto the first one.
//! - [`InlinePetOrchestrator`] calls the pets service directly, with no
//!   durability. Used when workflows are disabled or the engine is unreachable.

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use super::creation::{PetCreationInput, PET_CREATION_WORKFLOW};
use crate::durable::{StartWorkflowOptions, WorkflowEngine, WorkflowOutcome};
use crate::pets::ports::{PetOrchestrator, RequestContext};
use crate::pets::types::{AddPetCommand, PetProjection};
use crate::pets::PetService;
use crate::types::{PetstoreError, Result};

fn unix_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Correlation part of an unkeyed run id.
///
/// Characters outside `[A-Za-z0-9_-]` are replaced so the id stays a valid
/// key-value key; a missing token falls back to `fallback-<unix nanos>`.
pub fn trace_component(trace_id: Option<&str>) -> String {
    let sanitized: String = trace_id
        .unwrap_or_default()
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if sanitized.is_empty() {
        format!("fallback-{}", unix_nanos())
    } else {
        sanitized
    }
}

/// Run identity for a creation request.
///
/// Keyed requests map to `pet-creation-idem-<16 hex chars of sha256(key)>`,
/// so every retry of the same key lands on the same run.
pub fn creation_workflow_id(command: &AddPetCommand, trace_component: &str) -> String {
    if let Some(key) = command.key() {
        let digest = Sha256::digest(key.as_bytes());
        return format!("pet-creation-idem-{}", hex::encode(&digest[..8]));
    }

    let id = if command.pet.id != 0 {
        command.pet.id
    } else {
        unix_nanos()
    };
    format!("pet-creation-{}-{}", id, trace_component)
}

/// Map a finished creation run back onto the service contract
pub fn projection_from_outcome(outcome: WorkflowOutcome) -> Result<PetProjection> {
    match (outcome.result, outcome.failure) {
        (Some(value), None) => Ok(serde_json::from_value(value)?),
        (Some(value), Some(failure)) => Err(PetstoreError::PartnerSync {
            projection: Box::new(serde_json::from_value(value)?),
            message: PetstoreError::from(failure).to_string(),
        }),
        (None, Some(failure)) => Err(failure.into()),
        (None, None) => Err(PetstoreError::Workflow(
            "creation run finished without a result".to_string(),
        )),
    }
}

pub struct DurablePetOrchestrator {
    engine: Arc<dyn WorkflowEngine>,
    task_queue: String,
    mode: &'static str,
}

impl DurablePetOrchestrator {
    pub fn new(engine: Arc<dyn WorkflowEngine>, task_queue: impl Into<String>) -> Self {
        let mode = match engine.name() {
            "jetstream" => "durable-jetstream",
            _ => "durable-local",
        };
        Self {
            engine,
            task_queue: task_queue.into(),
            mode,
        }
    }
}

#[async_trait]
impl PetOrchestrator for DurablePetOrchestrator {
    async fn create_pet(
        &self,
        ctx: &RequestContext,
        command: AddPetCommand,
    ) -> Result<PetProjection> {
        let trace_id = trace_component(ctx.trace_id.as_deref());
        let options = StartWorkflowOptions {
            id: creation_workflow_id(&command, &trace_id),
            task_queue: self.task_queue.clone(),
        };
        let workflow_id = options.id.clone();
        let input = serde_json::to_value(PetCreationInput { command, trace_id })?;

        let run = match self
            .engine
            .execute_workflow(options, PET_CREATION_WORKFLOW, input)
            .await
        {
            Ok(run) => run,
            Err(PetstoreError::WorkflowAlreadyStarted(id)) => {
                info!(workflow_id = %id, "creation run already started; awaiting its result");
                self.engine.get_workflow(&id).await?
            }
            Err(e) => return Err(e),
        };

        let outcome = run.get().await?;
        info!(workflow_id = %workflow_id, failed = outcome.failure.is_some(), "creation run finished");
        projection_from_outcome(outcome)
    }

    fn mode(&self) -> &'static str {
        self.mode
    }
}

/// Synchronous creation through the pets service.
///
/// The service should have its partner wired so a sync failure is reported as
/// partial success, exactly like the durable path.
pub struct InlinePetOrchestrator {
    service: PetService,
}

impl InlinePetOrchestrator {
    pub fn new(service: PetService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl PetOrchestrator for InlinePetOrchestrator {
    async fn create_pet(
        &self,
        _ctx: &RequestContext,
        command: AddPetCommand,
    ) -> Result<PetProjection> {
        self.service.add_pet(&command).await
    }

    fn mode(&self) -> &'static str {
        "inline"
    }
}
