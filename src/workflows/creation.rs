//! Pet creation workflow

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::activities::PetActivities;
use super::sequence::{run_pet_creation_sequence, CreationOutcome, CreationPolicies};
use crate::durable::{Failure, Workflow, WorkflowContext, WorkflowOutcome};
use crate::pets::types::AddPetCommand;
use crate::types::Result;

pub const PET_CREATION_WORKFLOW: &str = "pets.workflows.Creation";

/// Queue consumed by workers processing pet workflows
pub const DEFAULT_TASK_QUEUE: &str = "PET_CREATION";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PetCreationInput {
    pub command: AddPetCommand,
    #[serde(default)]
    pub trace_id: String,
}

pub struct PetCreationWorkflow {
    activities: Arc<PetActivities>,
    policies: CreationPolicies,
}

impl PetCreationWorkflow {
    pub fn new(activities: Arc<PetActivities>) -> Self {
        Self::with_policies(activities, CreationPolicies::default())
    }

    pub fn with_policies(activities: Arc<PetActivities>, policies: CreationPolicies) -> Self {
        Self {
            activities,
            policies,
        }
    }

    /// Typed entry point
    pub async fn execute(
        &self,
        ctx: &WorkflowContext,
        input: PetCreationInput,
    ) -> Result<CreationOutcome> {
        let pet_id = input.command.pet.id;
        let trace_id = input.trace_id.as_str();
        info!(workflow_id = %ctx.workflow_id(), pet_id, trace_id, "PetCreationWorkflow started");

        let outcome =
            match run_pet_creation_sequence(ctx, &self.activities, &self.policies, input.command)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(workflow_id = %ctx.workflow_id(), pet_id, trace_id, error = %e, "PetCreationWorkflow interrupted before settling");
                    return Err(e);
                }
            };

        match &outcome {
            CreationOutcome::Completed(projection) => {
                info!(workflow_id = %ctx.workflow_id(), pet_id = projection.pet.id, trace_id, "PetCreationWorkflow completed")
            }
            CreationOutcome::PersistFailed(e) | CreationOutcome::SyncFailed { error: e, .. } => {
                error!(workflow_id = %ctx.workflow_id(), pet_id, trace_id, error = %e, "PetCreationWorkflow failed")
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl Workflow for PetCreationWorkflow {
    fn name(&self) -> &'static str {
        PET_CREATION_WORKFLOW
    }

    async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<WorkflowOutcome> {
        match serde_json::from_value::<PetCreationInput>(input) {
            Ok(input) => Ok(self.execute(&ctx, input).await?.into_workflow_outcome()),
            Err(e) => {
                error!(workflow_id = %ctx.workflow_id(), error = %e, "malformed pet creation input");
                Ok(WorkflowOutcome::failed(Failure::BadRequest {
                    message: format!("malformed workflow input: {}", e),
                }))
            }
        }
    }
}
