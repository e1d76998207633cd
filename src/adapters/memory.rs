//! In-memory pet repository and idempotency store
//!
//! Process-lifetime storage used in tests and when no MongoDB is configured.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::{Pet, Status};
use crate::pets::ports::{IdempotencyStore, PetRepository};
use crate::pets::types::{IdempotencyRecord, PetMetadata, PetProjection};
use crate::types::{PetstoreError, Result};

#[derive(Default)]
pub struct MemoryPetRepository {
    pets: RwLock<HashMap<i64, PetProjection>>,
}

impl MemoryPetRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut pets: Vec<PetProjection>) -> Vec<PetProjection> {
    pets.sort_by_key(|p| p.pet.id);
    pets
}

#[async_trait]
impl PetRepository for MemoryPetRepository {
    async fn save(&self, pet: &Pet) -> Result<PetProjection> {
        let now = Utc::now();
        let mut pets = self.pets.write().await;
        let created_at = pets
            .get(&pet.id)
            .map(|existing| existing.metadata.created_at)
            .unwrap_or(now);
        let projection = PetProjection {
            pet: pet.clone(),
            metadata: PetMetadata {
                created_at,
                updated_at: now,
            },
        };
        pets.insert(pet.id, projection.clone());
        Ok(projection)
    }

    async fn get_by_id(&self, id: i64) -> Result<PetProjection> {
        self.pets
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(PetstoreError::NotFound(id))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.pets
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(PetstoreError::NotFound(id))
    }

    async fn find_by_status(&self, statuses: &[Status]) -> Result<Vec<PetProjection>> {
        let pets = self.pets.read().await;
        Ok(sorted(
            pets.values()
                .filter(|p| statuses.contains(&p.pet.status))
                .cloned()
                .collect(),
        ))
    }

    async fn find_by_tags(&self, tags: &[String]) -> Result<Vec<PetProjection>> {
        let wanted: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        let pets = self.pets.read().await;
        Ok(sorted(
            pets.values()
                .filter(|p| p.pet.has_any_tag(&wanted))
                .cloned()
                .collect(),
        ))
    }

    async fn list(&self) -> Result<Vec<PetProjection>> {
        Ok(sorted(self.pets.read().await.values().cloned().collect()))
    }
}

#[derive(Default)]
pub struct MemoryIdempotencyStore {
    records: RwLock<HashMap<String, IdempotencyRecord>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(&self, mut record: IdempotencyRecord) -> Result<IdempotencyRecord> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.key) {
            return existing.clone().reconcile(&record);
        }

        let now = Utc::now();
        record.created_at = now;
        record.updated_at = now;
        records.insert(record.key.clone(), record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pet(id: i64, name: &str) -> Pet {
        Pet::new(id, name, vec!["http://x/p.jpg".into()]).unwrap()
    }

    #[tokio::test]
    async fn save_preserves_created_at_on_overwrite() {
        let repo = MemoryPetRepository::new();
        let first = repo.save(&pet(1, "Rex")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = repo.save(&pet(1, "Max")).await.unwrap();

        assert_eq!(first.metadata.created_at, second.metadata.created_at);
        assert!(second.metadata.updated_at > first.metadata.updated_at);
        assert_eq!(repo.get_by_id(1).await.unwrap().pet.name, "Max");
    }

    #[tokio::test]
    async fn missing_pets_are_not_found() {
        let repo = MemoryPetRepository::new();
        assert!(matches!(repo.get_by_id(3).await, Err(PetstoreError::NotFound(3))));
        assert!(matches!(repo.delete(3).await, Err(PetstoreError::NotFound(3))));
    }

    #[test]
    fn status_queries_are_sorted_by_id() {
        let repo = MemoryPetRepository::new();
        let mut sold = pet(9, "Bo");
        sold.update_status("sold").unwrap();
        tokio_test::block_on(async {
            repo.save(&sold).await.unwrap();
            repo.save(&pet(4, "Ax")).await.unwrap();
            repo.save(&pet(2, "Cy")).await.unwrap();
        });

        let available = tokio_test::block_on(repo.find_by_status(&[Status::Available])).unwrap();
        let ids: Vec<i64> = available.iter().map(|p| p.pet.id).collect();
        assert_eq!(ids, vec![2, 4]);
        tokio_test::assert_ok!(tokio_test::block_on(repo.find_by_status(&[])));
    }

    #[tokio::test]
    async fn idempotency_save_replays_and_detects_conflicts() {
        let store = MemoryIdempotencyStore::new();
        let stored = store
            .save(IdempotencyRecord::new("abc", "hash-1", 1))
            .await
            .unwrap();

        let replay = store
            .save(IdempotencyRecord::new("abc", "hash-1", 1))
            .await
            .unwrap();
        assert_eq!(replay, stored);

        match store.save(IdempotencyRecord::new("abc", "hash-2", 2)).await {
            Err(PetstoreError::IdempotencyConflict { existing, .. }) => {
                assert_eq!(*existing, stored)
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        match store.save(IdempotencyRecord::new("abc", "hash-1", 5)).await {
            Err(PetstoreError::IdempotencyConflict { existing, .. }) => {
                assert_eq!(existing.pet_id, 1)
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_first_inserts_settle_on_one_record() {
        let store = std::sync::Arc::new(MemoryIdempotencyStore::new());
        let attempts = (0..8).map(|_| {
            let store = store.clone();
            async move { store.save(IdempotencyRecord::new("race", "h", 1)).await }
        });
        let results = futures::future::join_all(attempts).await;

        let first = results[0].as_ref().unwrap().clone();
        for result in &results {
            assert_eq!(result.as_ref().unwrap(), &first);
        }
    }
}
