//! Pets application service
//!
//! Orchestrates the catalog use cases over the repository, the optional
//! idempotency store and the optional partner sync.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::fingerprint::fingerprint_add_pet;
use super::ports::{IdempotencyStore, PartnerSync, PetRepository};
use super::types::{
    AddPetCommand, GroomPetCommand, IdempotencyRecord, PetIdentifier, PetMutation, PetProjection,
    UpdatePetWithForm, UploadImageCommand, UploadImageResult,
};
use crate::domain::{Category, ExternalReference, GroomingOperation, Pet, PetError, Status, Tag};
use crate::types::{PetstoreError, Result};

/// Pets use cases
#[derive(Clone)]
pub struct PetService {
    repo: Arc<dyn PetRepository>,
    idempotency: Option<Arc<dyn IdempotencyStore>>,
    partner: Option<Arc<dyn PartnerSync>>,
}

impl PetService {
    pub fn new(repo: Arc<dyn PetRepository>) -> Self {
        Self {
            repo,
            idempotency: None,
            partner: None,
        }
    }

    /// Record idempotency keys on add and replay matching requests
    pub fn with_idempotency(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = Some(store);
        self
    }

    /// Push newly added pets to the partner as part of `add_pet`
    pub fn with_partner(mut self, partner: Arc<dyn PartnerSync>) -> Self {
        self.partner = Some(partner);
        self
    }

    /// Copy of this service without the partner side effect
    pub fn without_partner(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            idempotency: self.idempotency.clone(),
            partner: None,
        }
    }

    pub fn repository(&self) -> Arc<dyn PetRepository> {
        Arc::clone(&self.repo)
    }

    /// Persist a new pet.
    ///
    /// With an idempotency key, a request matching the stored fingerprint is
    /// replayed from the repository and skips the partner; a request whose
    /// fingerprint differs is rejected with a conflict.
    pub async fn add_pet(&self, command: &AddPetCommand) -> Result<PetProjection> {
        let pet_id = command.pet.id;
        info!(pet_id, "adding pet");

        let mut pending_key = None;
        if let (Some(key), Some(store)) = (command.key(), self.idempotency.as_ref()) {
            let request_hash = fingerprint_add_pet(command)?;
            if let Some(existing) = store.get(key).await? {
                if existing.request_hash != request_hash {
                    warn!(pet_id, key, "idempotency key reused with a different payload");
                    return Err(PetstoreError::IdempotencyConflict {
                        key: key.to_string(),
                        existing: Box::new(existing),
                    });
                }
                info!(pet_id = existing.pet_id, key, "replaying idempotent add");
                return self.repo.get_by_id(existing.pet_id).await;
            }
            pending_key = Some((key, store, request_hash));
        }

        let pet = build_pet(&command.pet).map_err(|e| {
            warn!(pet_id, error = %e, "failed to build pet");
            PetstoreError::from(e)
        })?;

        let saved = self.repo.save(&pet).await.map_err(|e| {
            error!(pet_id, error = %e, "failed to persist pet");
            e
        })?;

        if let Some((key, store, request_hash)) = pending_key {
            store
                .save(IdempotencyRecord::new(key, &request_hash, saved.pet.id))
                .await?;
            debug!(pet_id = saved.pet.id, key, "idempotency key recorded");
        }

        if let Some(partner) = &self.partner {
            if let Err(e) = partner.sync(&saved.pet).await {
                error!(pet_id = saved.pet.id, error = %e, "partner sync failed after add");
                return Err(PetstoreError::PartnerSync {
                    message: e.to_string(),
                    projection: Box::new(saved),
                });
            }
        }

        info!(pet_id = saved.pet.id, status = %saved.pet.status, "pet added");
        Ok(saved)
    }

    /// Apply a partial mutation to an existing pet
    pub async fn update_pet(&self, mutation: &PetMutation) -> Result<PetProjection> {
        info!(pet_id = mutation.id, "updating pet");
        let mut projection = self.repo.get_by_id(mutation.id).await?;
        apply_mutation(&mut projection.pet, mutation)?;
        let saved = self.repo.save(&projection.pet).await?;
        info!(pet_id = saved.pet.id, status = %saved.pet.status, "pet updated");
        Ok(saved)
    }

    pub async fn update_pet_with_form(&self, form: &UpdatePetWithForm) -> Result<PetProjection> {
        info!(pet_id = form.id, "updating pet via form");
        let mut projection = self.repo.get_by_id(form.id).await?;
        if let Some(name) = form.name.as_deref().filter(|n| !n.is_empty()) {
            projection.pet.rename(name)?;
        }
        if let Some(status) = form.status.as_deref().filter(|s| !s.is_empty()) {
            projection.pet.update_status(status)?;
        }
        self.repo.save(&projection.pet).await
    }

    pub async fn get_by_id(&self, input: PetIdentifier) -> Result<PetProjection> {
        debug!(pet_id = input.id, "loading pet");
        self.repo.get_by_id(input.id).await
    }

    pub async fn delete(&self, input: PetIdentifier) -> Result<()> {
        info!(pet_id = input.id, "deleting pet");
        self.repo.delete(input.id).await
    }

    /// Apply a transient grooming operation and persist the resulting hair length
    pub async fn groom_pet(&self, command: &GroomPetCommand) -> Result<PetProjection> {
        info!(
            pet_id = command.id,
            initial_length_cm = command.initial_hair_length_cm,
            trim_by_cm = command.trim_by_cm,
            "grooming pet"
        );
        let mut projection = self.repo.get_by_id(command.id).await?;
        projection.pet.groom(GroomingOperation {
            initial_length_cm: command.initial_hair_length_cm,
            trim_by_cm: command.trim_by_cm,
        })?;
        let saved = self.repo.save(&projection.pet).await?;
        info!(pet_id = saved.pet.id, hair_length_cm = saved.pet.hair_length_cm, "pet groomed");
        Ok(saved)
    }

    /// Pets matching any of the statuses; no statuses means `available`
    pub async fn find_by_status(&self, statuses: &[String]) -> Result<Vec<PetProjection>> {
        let mut parsed = statuses
            .iter()
            .map(|s| Status::parse(s))
            .collect::<std::result::Result<Vec<_>, PetError>>()?;
        if parsed.is_empty() {
            parsed.push(Status::Available);
        }
        let found = self.repo.find_by_status(&parsed).await?;
        debug!(count = found.len(), "found pets by status");
        Ok(found)
    }

    pub async fn find_by_tags(&self, tags: &[String]) -> Result<Vec<PetProjection>> {
        let found = self.repo.find_by_tags(tags).await?;
        debug!(count = found.len(), "found pets by tags");
        Ok(found)
    }

    pub async fn list(&self) -> Result<Vec<PetProjection>> {
        self.repo.list().await
    }

    /// Record an uploaded asset against an existing pet
    pub async fn upload_image(&self, command: &UploadImageCommand) -> Result<UploadImageResult> {
        self.repo.get_by_id(command.id).await?;
        let mut message = format!("image '{}' stored for pet {}", command.filename, command.id);
        if let Some(metadata) = command.metadata.as_deref().filter(|m| !m.is_empty()) {
            message = format!("{} ({})", message, metadata);
        }
        Ok(UploadImageResult {
            code: 200,
            kind: "upload".to_string(),
            message,
        })
    }
}

/// Build a new aggregate from a creation payload
pub fn build_pet(mutation: &PetMutation) -> std::result::Result<Pet, PetError> {
    let name = mutation.name.as_deref().ok_or(PetError::EmptyName)?;
    let photos = mutation.photo_urls.clone().ok_or(PetError::EmptyPhotos)?;
    let mut pet = Pet::new(mutation.id, name, photos)?;
    pet.update_status(mutation.status.as_deref().unwrap_or_default())?;

    let rest = PetMutation {
        name: None,
        photo_urls: None,
        status: None,
        ..mutation.clone()
    };
    apply_mutation(&mut pet, &rest)?;
    Ok(pet)
}

/// Apply every supplied field of a mutation to the pet
pub fn apply_mutation(pet: &mut Pet, mutation: &PetMutation) -> std::result::Result<(), PetError> {
    if let Some(name) = &mutation.name {
        pet.rename(name)?;
    }
    if let Some(photos) = &mutation.photo_urls {
        pet.replace_photos(photos.clone())?;
    }
    if let Some(category) = &mutation.category {
        if category.id == 0 && category.name.is_empty() {
            pet.update_category(None);
        } else {
            pet.update_category(Some(Category {
                id: category.id,
                name: category.name.clone(),
            }));
        }
    }
    if let Some(tags) = &mutation.tags {
        pet.replace_tags(
            tags.iter()
                .map(|t| Tag {
                    id: t.id,
                    name: t.name.clone(),
                })
                .collect(),
        );
    }
    if let Some(status) = &mutation.status {
        pet.update_status(status)?;
    }
    if let Some(length) = mutation.hair_length_cm {
        pet.update_hair_length(length)?;
    }
    if let Some(reference) = &mutation.external_reference {
        if reference.provider.is_empty() && reference.id.is_empty() && reference.attributes.is_empty()
        {
            pet.update_external_reference(None);
        } else {
            pet.update_external_reference(Some(ExternalReference {
                provider: reference.provider.clone(),
                id: reference.id.clone(),
                attributes: reference.attributes.clone(),
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryIdempotencyStore, MemoryPetRepository};
    use crate::pets::types::TagInput;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPartner {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PartnerSync for CountingPartner {
        async fn sync(&self, _pet: &Pet) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PetstoreError::Partner("503 Service Unavailable".into()));
            }
            Ok(())
        }
    }

    fn add(id: i64, name: &str, key: Option<&str>) -> AddPetCommand {
        AddPetCommand {
            pet: PetMutation {
                id,
                name: Some(name.into()),
                photo_urls: Some(vec![format!("http://x/{}.jpg", name.to_lowercase())]),
                ..Default::default()
            },
            idempotency_key: key.map(str::to_string),
        }
    }

    fn service() -> (PetService, Arc<MemoryIdempotencyStore>) {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let service = PetService::new(Arc::new(MemoryPetRepository::new()))
            .with_idempotency(store.clone());
        (service, store)
    }

    #[tokio::test]
    async fn add_pet_without_key_persists() {
        let (service, _) = service();
        let saved = service.add_pet(&add(1, "Rex", None)).await.unwrap();
        assert_eq!(saved.pet.id, 1);
        assert_eq!(saved.pet.name, "Rex");
        assert_eq!(saved.pet.status, Status::Available);
    }

    #[tokio::test]
    async fn add_pet_replays_matching_key_without_partner_call() {
        let (service, _) = service();
        let partner = Arc::new(CountingPartner::default());
        let service = service.with_partner(partner.clone());

        let first = service.add_pet(&add(1, "Rex", Some("abc"))).await.unwrap();
        let second = service.add_pet(&add(1, "Rex", Some("abc"))).await.unwrap();

        assert_eq!(first.pet.id, second.pet.id);
        assert_eq!(partner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn add_pet_rejects_key_reuse_with_different_payload() {
        let (service, store) = service();
        service.add_pet(&add(1, "Rex", Some("abc"))).await.unwrap();

        let err = service
            .add_pet(&add(2, "Buddy", Some("abc")))
            .await
            .unwrap_err();
        match err {
            PetstoreError::IdempotencyConflict { key, existing } => {
                assert_eq!(key, "abc");
                assert_eq!(existing.pet_id, 1);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.get("abc").await.unwrap().unwrap().pet_id, 1);
        assert!(matches!(
            service.get_by_id(PetIdentifier { id: 2 }).await,
            Err(PetstoreError::NotFound(2))
        ));
    }

    #[tokio::test]
    async fn add_pet_reports_partial_success_when_partner_fails() {
        let (service, _) = service();
        let partner = Arc::new(CountingPartner {
            fail: true,
            ..Default::default()
        });
        let service = service.with_partner(partner);

        match service.add_pet(&add(1, "Rex", None)).await {
            Err(PetstoreError::PartnerSync { projection, .. }) => {
                assert_eq!(projection.pet.id, 1)
            }
            other => panic!("expected partial success, got {other:?}"),
        }
        assert!(service.get_by_id(PetIdentifier { id: 1 }).await.is_ok());
    }

    #[tokio::test]
    async fn add_pet_requires_name_and_photos() {
        let (service, _) = service();
        let mut command = add(1, "Rex", None);
        command.pet.photo_urls = None;
        assert!(matches!(
            service.add_pet(&command).await,
            Err(PetstoreError::Validation(PetError::EmptyPhotos))
        ));
        command.pet.name = None;
        assert!(matches!(
            service.add_pet(&command).await,
            Err(PetstoreError::Validation(PetError::EmptyName))
        ));
    }

    #[tokio::test]
    async fn groom_rejects_invalid_trim_before_persisting() {
        let (service, _) = service();
        service.add_pet(&add(1, "Rex", None)).await.unwrap();
        let before = service.get_by_id(PetIdentifier { id: 1 }).await.unwrap();

        let err = service
            .groom_pet(&GroomPetCommand {
                id: 1,
                initial_hair_length_cm: 2.0,
                trim_by_cm: 3.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PetstoreError::Validation(PetError::InvalidGrooming)));

        let after = service.get_by_id(PetIdentifier { id: 1 }).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn update_applies_partial_mutation() {
        let (service, _) = service();
        service.add_pet(&add(1, "Rex", None)).await.unwrap();
        let updated = service
            .update_pet(&PetMutation {
                id: 1,
                status: Some("sold".into()),
                tags: Some(vec![TagInput {
                    id: 1,
                    name: "Friendly".into(),
                }]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.pet.name, "Rex");
        assert_eq!(updated.pet.status, Status::Sold);

        let found = service.find_by_tags(&["friendly".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
        let sold = service.find_by_status(&["sold".to_string()]).await.unwrap();
        assert_eq!(sold.len(), 1);
        assert!(service.find_by_status(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn form_update_rejects_unknown_status() {
        let (service, _) = service();
        service.add_pet(&add(1, "Rex", None)).await.unwrap();
        let err = service
            .update_pet_with_form(&UpdatePetWithForm {
                id: 1,
                name: Some("Max".into()),
                status: Some("adopted".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PetstoreError::Validation(PetError::InvalidStatus(_))));
    }

    #[tokio::test]
    async fn upload_image_requires_existing_pet() {
        let (service, _) = service();
        let missing = service
            .upload_image(&UploadImageCommand {
                id: 9,
                filename: "rex.png".into(),
                metadata: None,
            })
            .await;
        assert!(matches!(missing, Err(PetstoreError::NotFound(9))));

        service.add_pet(&add(9, "Rex", None)).await.unwrap();
        let result = service
            .upload_image(&UploadImageCommand {
                id: 9,
                filename: "rex.png".into(),
                metadata: Some("front".into()),
            })
            .await
            .unwrap();
        assert_eq!(result.message, "image 'rex.png' stored for pet 9 (front)");
    }
}
