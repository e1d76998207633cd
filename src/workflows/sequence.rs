//! Persist-then-sync sequence shared by the creation workflow
//!
//! `Persisting -> Syncing -> Completed`, with `Failed` reachable from either
//! step. A sync failure keeps the persisted projection.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::activities::{PetActivities, PERSIST_PET_ACTIVITY, SYNC_PET_ACTIVITY};
use crate::durable::{ActivityOptions, Failure, RetryPolicy, WorkflowContext, WorkflowOutcome};
use crate::pets::types::{AddPetCommand, PetIdentifier, PetProjection};
use crate::types::{PetstoreError, Result};

/// Persistence is the source of truth and gets the more patient policy
pub fn persist_options() -> ActivityOptions {
    ActivityOptions {
        start_to_close_timeout: Duration::from_secs(60),
        retry_policy: RetryPolicy {
            initial_interval: Duration::from_secs(2),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(10),
            maximum_attempts: 5,
        },
    }
}

pub fn sync_options() -> ActivityOptions {
    ActivityOptions {
        start_to_close_timeout: Duration::from_secs(30),
        retry_policy: RetryPolicy {
            initial_interval: Duration::from_secs(2),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(5),
            maximum_attempts: 3,
        },
    }
}

/// Activity options for the two steps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreationPolicies {
    pub persist: ActivityOptions,
    pub sync: ActivityOptions,
}

impl Default for CreationPolicies {
    fn default() -> Self {
        Self {
            persist: persist_options(),
            sync: sync_options(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationState {
    Persisting,
    Syncing,
    Completed,
    Failed,
}

/// Result of one pass through the sequence
#[derive(Debug)]
pub enum CreationOutcome {
    Completed(PetProjection),
    PersistFailed(PetstoreError),
    SyncFailed {
        projection: PetProjection,
        error: PetstoreError,
    },
}

impl CreationOutcome {
    pub fn into_workflow_outcome(self) -> WorkflowOutcome {
        match self {
            CreationOutcome::Completed(projection) => match serde_json::to_value(&projection) {
                Ok(value) => WorkflowOutcome::completed(value),
                Err(e) => WorkflowOutcome::failed(Failure::internal(e.to_string())),
            },
            CreationOutcome::PersistFailed(error) => WorkflowOutcome::failed(Failure::from(&error)),
            CreationOutcome::SyncFailed { projection, error } => {
                match serde_json::to_value(&projection) {
                    Ok(value) => WorkflowOutcome::partial(value, Failure::from(&error)),
                    Err(e) => WorkflowOutcome::failed(Failure::internal(e.to_string())),
                }
            }
        }
    }
}

fn transition(ctx: &WorkflowContext, pet_id: i64, state: CreationState) {
    info!(workflow_id = %ctx.workflow_id(), pet_id, state = ?state, "pet creation state");
}

/// Run persistence, then partner sync for the persisted pet.
///
/// `Err` only for engine failures: the run has not settled and is executed
/// again from its recorded history.
pub async fn run_pet_creation_sequence(
    ctx: &WorkflowContext,
    activities: &Arc<PetActivities>,
    policies: &CreationPolicies,
    command: AddPetCommand,
) -> Result<CreationOutcome> {
    let pet_id = command.pet.id;

    transition(ctx, pet_id, CreationState::Persisting);
    let persisted = ctx
        .execute_activity(PERSIST_PET_ACTIVITY, &policies.persist, command, |actx, command| {
            let activities = activities.clone();
            async move { activities.persist_pet(&actx, &command).await }
        })
        .await;

    let projection = match persisted {
        Ok(projection) => projection,
        Err(e) if e.is_engine_failure() => return Err(e),
        Err(e) => {
            error!(workflow_id = %ctx.workflow_id(), pet_id, error = %e, "pet persistence failed");
            transition(ctx, pet_id, CreationState::Failed);
            return Ok(CreationOutcome::PersistFailed(e));
        }
    };

    let pet_id = projection.pet.id;
    transition(ctx, pet_id, CreationState::Syncing);
    let synced = ctx
        .execute_activity(
            SYNC_PET_ACTIVITY,
            &policies.sync,
            PetIdentifier { id: pet_id },
            |actx, input| {
                let activities = activities.clone();
                async move { activities.sync_pet_with_partner(&actx, input).await }
            },
        )
        .await;

    match synced {
        Ok(()) => {
            transition(ctx, pet_id, CreationState::Completed);
            Ok(CreationOutcome::Completed(projection))
        }
        Err(e) if e.is_engine_failure() => Err(e),
        Err(e) => {
            error!(workflow_id = %ctx.workflow_id(), pet_id, error = %e, "partner sync failed after persistence");
            transition(ctx, pet_id, CreationState::Failed);
            Ok(CreationOutcome::SyncFailed {
                projection,
                error: e,
            })
        }
    }
}
