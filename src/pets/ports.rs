//! Ports consumed and exposed by the pets bounded context

use async_trait::async_trait;

use super::types::{AddPetCommand, IdempotencyRecord, PetProjection};
use crate::domain::{Pet, Status};
use crate::types::Result;

/// Pet persistence. `save` is a last-writer-wins upsert keyed by pet id.
#[async_trait]
pub trait PetRepository: Send + Sync {
    async fn save(&self, pet: &Pet) -> Result<PetProjection>;
    /// Fails with `PetstoreError::NotFound` when absent
    async fn get_by_id(&self, id: i64) -> Result<PetProjection>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn find_by_status(&self, statuses: &[Status]) -> Result<Vec<PetProjection>>;
    async fn find_by_tags(&self, tags: &[String]) -> Result<Vec<PetProjection>>;
    async fn list(&self) -> Result<Vec<PetProjection>>;
}

/// Maps client idempotency keys to the outcome of a create request
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Stored record for the key, if any
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Store the record.
    ///
    /// An existing record with the same hash and pet id is returned as is.
    /// An existing record that differs yields `PetstoreError::IdempotencyConflict`
    /// carrying the stored record.
    async fn save(&self, record: IdempotencyRecord) -> Result<IdempotencyRecord>;
}

/// Outbound partner integration
#[async_trait]
pub trait PartnerSync: Send + Sync {
    async fn sync(&self, pet: &Pet) -> Result<()>;
}

/// Per-request correlation data handed to the orchestrator
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub trace_id: Option<String>,
}

/// Runs the pet-creation sequence, either inline or as a durable workflow
#[async_trait]
pub trait PetOrchestrator: Send + Sync {
    /// Persist then sync a new pet.
    ///
    /// A pet that was persisted but failed to sync is reported as
    /// `PetstoreError::PartnerSync`, which carries the projection.
    async fn create_pet(&self, ctx: &RequestContext, command: AddPetCommand)
        -> Result<PetProjection>;

    /// Short label for logs and health output
    fn mode(&self) -> &'static str;
}
