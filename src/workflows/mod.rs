//! Pet creation workflow, its activities and the orchestrators that start it

pub mod activities;
pub mod creation;
pub mod orchestrator;
pub mod sequence;

pub use activities::{
    partner_sync_hash, PetActivities, SyncHeartbeat, PARTNER_SYNC_HASH_KEY, PERSIST_PET_ACTIVITY,
    SYNC_PET_ACTIVITY,
};
pub use creation::{PetCreationInput, PetCreationWorkflow, DEFAULT_TASK_QUEUE, PET_CREATION_WORKFLOW};
pub use orchestrator::{
    creation_workflow_id, projection_from_outcome, trace_component, DurablePetOrchestrator,
    InlinePetOrchestrator,
};
pub use sequence::{
    run_pet_creation_sequence, CreationOutcome, CreationPolicies, CreationState,
};

use std::sync::Arc;

use crate::durable::WorkflowRegistry;

/// Registry holding every workflow a petstore worker executes
pub fn registry(activities: Arc<PetActivities>) -> WorkflowRegistry {
    WorkflowRegistry::builder()
        .register(Arc::new(PetCreationWorkflow::new(activities)))
        .build()
}
