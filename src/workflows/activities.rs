//! Pet creation activities
//!
//! Persistence and partner sync are separate activities so that a failing
//! partner never causes a second persistence write.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info};

use crate::domain::{ExternalReference, Pet, Status};
use crate::durable::ActivityContext;
use crate::pets::ports::{PartnerSync, PetRepository};
use crate::pets::types::{AddPetCommand, PetIdentifier, PetProjection};
use crate::pets::PetService;
use crate::types::Result;

pub const PERSIST_PET_ACTIVITY: &str = "pets.activities.PersistPet";
pub const SYNC_PET_ACTIVITY: &str = "pets.activities.SyncPetWithPartner";

/// External-reference attribute holding the hash of the last synced payload
pub const PARTNER_SYNC_HASH_KEY: &str = "partner_sync_hash";

/// Provider recorded when a sync creates the external reference
const PARTNER_PROVIDER: &str = "partner";

/// Progress of one sync invocation, visible to its later attempts
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SyncHeartbeat {
    pub completed: bool,
    pub hash: String,
}

#[derive(Serialize)]
struct SyncTag<'a> {
    id: i64,
    name: &'a str,
}

#[derive(Serialize)]
struct SyncAttribute<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncDocument<'a> {
    id: i64,
    name: &'a str,
    status: Status,
    category_id: i64,
    category_name: &'a str,
    photo_urls: &'a [String],
    tags: Vec<SyncTag<'a>>,
    attributes: Vec<SyncAttribute<'a>>,
}

/// Hex SHA-256 over the partner-relevant fields of a pet.
///
/// Tags and external attributes are sorted so ordering never changes the
/// hash. The stored hash attribute itself is left out.
pub fn partner_sync_hash(pet: &Pet) -> Result<String> {
    let mut tags: Vec<SyncTag<'_>> = pet
        .tags
        .iter()
        .map(|tag| SyncTag {
            id: tag.id,
            name: &tag.name,
        })
        .collect();
    tags.sort_by(|a, b| a.name.cmp(b.name).then(a.id.cmp(&b.id)));

    let mut attributes: Vec<SyncAttribute<'_>> = pet
        .external_ref
        .iter()
        .flat_map(|reference| reference.attributes.iter())
        .filter(|(key, _)| key.as_str() != PARTNER_SYNC_HASH_KEY)
        .map(|(key, value)| SyncAttribute {
            key: key.as_str(),
            value: value.as_str(),
        })
        .collect();
    attributes.sort_by(|a, b| a.key.cmp(b.key));

    let document = SyncDocument {
        id: pet.id,
        name: &pet.name,
        status: pet.status,
        category_id: pet.category.as_ref().map(|c| c.id).unwrap_or_default(),
        category_name: pet.category.as_ref().map(|c| c.name.as_str()).unwrap_or_default(),
        photo_urls: &pet.photo_urls,
        tags,
        attributes,
    };

    let bytes = serde_json::to_vec(&document)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn already_synced(pet: &Pet, hash: &str) -> bool {
    pet.external_ref
        .as_ref()
        .and_then(|reference| reference.attributes.get(PARTNER_SYNC_HASH_KEY))
        .is_some_and(|stored| stored == hash)
}

fn store_sync_hash(pet: &mut Pet, hash: &str) {
    let mut reference = pet.external_ref.clone().unwrap_or_else(|| ExternalReference {
        provider: PARTNER_PROVIDER.to_string(),
        id: pet.id.to_string(),
        ..Default::default()
    });
    reference
        .attributes
        .insert(PARTNER_SYNC_HASH_KEY.to_string(), hash.to_string());
    pet.update_external_reference(Some(reference));
}

/// Activity implementations over the pets collaborators
pub struct PetActivities {
    persist: PetService,
    repo: Arc<dyn PetRepository>,
    partner: Option<Arc<dyn PartnerSync>>,
}

impl PetActivities {
    /// The persistence path never calls the partner, whatever `service` has wired
    pub fn new(service: &PetService, partner: Option<Arc<dyn PartnerSync>>) -> Self {
        Self {
            persist: service.without_partner(),
            repo: service.repository(),
            partner,
        }
    }

    /// Validate, build and save the pet
    pub async fn persist_pet(
        &self,
        ctx: &ActivityContext,
        command: &AddPetCommand,
    ) -> Result<PetProjection> {
        let pet_id = command.pet.id;
        info!(pet_id, attempt = ctx.attempt(), "PersistPet activity started");

        let projection = self.persist.add_pet(command).await.map_err(|e| {
            error!(pet_id, error = %e, "PersistPet activity failed");
            e
        })?;

        info!(pet_id = projection.pet.id, "PersistPet activity completed");
        Ok(projection)
    }

    /// Push the stored pet to the partner unless its content was already synced
    pub async fn sync_pet_with_partner(
        &self,
        ctx: &ActivityContext,
        input: PetIdentifier,
    ) -> Result<()> {
        let pet_id = input.id;
        let Some(partner) = &self.partner else {
            info!(pet_id, "partner sync not configured; skipping");
            return Ok(());
        };

        let heartbeat: SyncHeartbeat = ctx.heartbeat_details().await?.unwrap_or_default();
        if heartbeat.completed {
            info!(pet_id, "SyncPetWithPartner already completed in prior attempt; skipping");
            return Ok(());
        }

        info!(pet_id, attempt = ctx.attempt(), "SyncPetWithPartner activity started");
        let mut projection = self.repo.get_by_id(pet_id).await.map_err(|e| {
            error!(pet_id, error = %e, "SyncPetWithPartner failed to load pet");
            e
        })?;

        let hash = partner_sync_hash(&projection.pet)?;
        if already_synced(&projection.pet, &hash) {
            info!(pet_id, "SyncPetWithPartner skipped; payload unchanged since last sync");
            return Ok(());
        }

        partner.sync(&projection.pet).await.map_err(|e| {
            error!(pet_id, error = %e, "SyncPetWithPartner failed");
            e
        })?;

        store_sync_hash(&mut projection.pet, &hash);
        self.repo.save(&projection.pet).await.map_err(|e| {
            error!(pet_id, error = %e, "SyncPetWithPartner failed to persist sync hash");
            e
        })?;

        ctx.record_heartbeat(&SyncHeartbeat {
            completed: true,
            hash,
        })
        .await?;
        info!(pet_id, "SyncPetWithPartner activity completed");
        Ok(())
    }
}
