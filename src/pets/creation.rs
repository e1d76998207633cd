//! Entry point for inbound create-pet requests
//!
//! Fingerprints keyed requests and rejects key reuse before any orchestration
//! starts, then hands the command to the configured orchestrator. Durable runs
//! collapse on the key-derived identity and never see the second payload.

use std::sync::Arc;
use tracing::{info, warn};

use super::fingerprint::fingerprint_add_pet;
use super::ports::{IdempotencyStore, PetOrchestrator, RequestContext};
use super::types::{AddPetCommand, PetProjection};
use crate::types::{PetstoreError, Result};

pub struct PetCreationService {
    orchestrator: Arc<dyn PetOrchestrator>,
    idempotency: Arc<dyn IdempotencyStore>,
}

impl PetCreationService {
    pub fn new(orchestrator: Arc<dyn PetOrchestrator>, idempotency: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            orchestrator,
            idempotency,
        }
    }

    pub fn mode(&self) -> &'static str {
        self.orchestrator.mode()
    }

    pub async fn create_pet(
        &self,
        ctx: &RequestContext,
        command: AddPetCommand,
    ) -> Result<PetProjection> {
        if let Some(key) = command.key() {
            let request_hash = fingerprint_add_pet(&command)?;
            if let Some(existing) = self.idempotency.get(key).await? {
                if existing.request_hash != request_hash {
                    warn!(key, pet_id = existing.pet_id, "rejecting reused idempotency key");
                    return Err(PetstoreError::IdempotencyConflict {
                        key: key.to_string(),
                        existing: Box::new(existing),
                    });
                }
                info!(key, pet_id = existing.pet_id, "idempotent replay");
            }
        }

        self.orchestrator.create_pet(ctx, command).await
    }
}
