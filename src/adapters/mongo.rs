//! MongoDB-backed pet repository and idempotency store

use async_trait::async_trait;
use bson::{doc, Bson};
use tracing::debug;

use crate::db::schemas::{IdempotencyKeyDoc, PetDoc, IDEMPOTENCY_KEY_COLLECTION, PET_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::domain::{Pet, Status};
use crate::pets::ports::{IdempotencyStore, PetRepository};
use crate::pets::types::{IdempotencyRecord, PetProjection};
use crate::types::{PetstoreError, Result};

pub struct MongoPetRepository {
    pets: MongoCollection<PetDoc>,
}

impl MongoPetRepository {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            pets: client.collection(PET_COLLECTION).await?,
        })
    }

    async fn find(&self, filter: bson::Document) -> Result<Vec<PetProjection>> {
        let docs = self.pets.find_many(filter, doc! { "pet_id": 1 }).await?;
        Ok(docs.into_iter().map(PetDoc::into_projection).collect())
    }
}

#[async_trait]
impl PetRepository for MongoPetRepository {
    async fn save(&self, pet: &Pet) -> Result<PetProjection> {
        let pet_bson = bson::to_bson(pet)
            .map_err(|e| PetstoreError::Database(format!("Failed to encode pet: {}", e)))?;
        let tag_keys: Vec<Bson> = PetDoc::tag_keys(pet).into_iter().map(Bson::String).collect();

        self.pets
            .upsert_one(
                doc! { "pet_id": pet.id },
                doc! {
                    "pet_id": pet.id,
                    "pet": pet_bson,
                    "tag_keys": tag_keys,
                },
            )
            .await?;

        self.get_by_id(pet.id).await
    }

    async fn get_by_id(&self, id: i64) -> Result<PetProjection> {
        self.pets
            .find_one(doc! { "pet_id": id })
            .await?
            .map(PetDoc::into_projection)
            .ok_or(PetstoreError::NotFound(id))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = self.pets.soft_delete(doc! { "pet_id": id }).await?;
        if result.matched_count == 0 {
            return Err(PetstoreError::NotFound(id));
        }
        Ok(())
    }

    async fn find_by_status(&self, statuses: &[Status]) -> Result<Vec<PetProjection>> {
        let statuses: Vec<&str> = statuses.iter().map(Status::as_str).collect();
        self.find(doc! { "pet.status": { "$in": statuses } }).await
    }

    async fn find_by_tags(&self, tags: &[String]) -> Result<Vec<PetProjection>> {
        let keys: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        self.find(doc! { "tag_keys": { "$in": keys } }).await
    }

    async fn list(&self) -> Result<Vec<PetProjection>> {
        self.find(doc! {}).await
    }
}

/// Key lookups and inserts the idempotency store needs from its collection
#[async_trait]
trait KeyCollection: Send + Sync {
    async fn find_key(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Fails with `PetstoreError::AlreadyExists` when the key is already stored
    async fn insert_key(&self, record: &IdempotencyRecord) -> Result<()>;
}

#[async_trait]
impl KeyCollection for MongoCollection<IdempotencyKeyDoc> {
    async fn find_key(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .find_one(doc! { "key": key })
            .await?
            .map(IdempotencyKeyDoc::into_record))
    }

    async fn insert_key(&self, record: &IdempotencyRecord) -> Result<()> {
        self.insert_one(IdempotencyKeyDoc::from_record(record)).await?;
        Ok(())
    }
}

async fn stored(keys: &dyn KeyCollection, key: &str) -> Result<IdempotencyRecord> {
    keys.find_key(key).await?.ok_or_else(|| {
        PetstoreError::Database(format!("idempotency key '{}' missing after insert", key))
    })
}

/// First insert wins; every other save reconciles against the stored record
async fn save_once(keys: &dyn KeyCollection, record: IdempotencyRecord) -> Result<IdempotencyRecord> {
    if let Some(existing) = keys.find_key(&record.key).await? {
        return existing.reconcile(&record);
    }

    match keys.insert_key(&record).await {
        Ok(()) => stored(keys, &record.key).await,
        Err(PetstoreError::AlreadyExists(_)) => {
            // Lost a concurrent first insert for this key
            debug!(key = %record.key, "idempotency key inserted concurrently");
            stored(keys, &record.key).await?.reconcile(&record)
        }
        Err(e) => Err(e),
    }
}

pub struct MongoIdempotencyStore {
    keys: MongoCollection<IdempotencyKeyDoc>,
}

impl MongoIdempotencyStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            keys: client.collection(IDEMPOTENCY_KEY_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl IdempotencyStore for MongoIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.keys.find_key(key).await
    }

    async fn save(&self, record: IdempotencyRecord) -> Result<IdempotencyRecord> {
        save_once(&self.keys, record).await
    }
}
