//! MongoDB client and collection wrapper

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::db::schemas::Metadata;
use crate::types::PetstoreError;

/// Server error code for unique index violations
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// Whether a driver error is a unique index violation
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn insert_error(e: mongodb::error::Error) -> PetstoreError {
    if is_duplicate_key(&e) {
        PetstoreError::AlreadyExists(e.to_string())
    } else {
        PetstoreError::Database(format!("Insert failed: {}", e))
    }
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, PetstoreError> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast when MongoDB is unreachable
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| PetstoreError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| PetstoreError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection, applying its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, PetstoreError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + Default + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

}

/// Typed MongoDB collection with automatic indexing and soft deletes
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + Default + IntoIndexes + MutMetadata,
{
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, PetstoreError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<(), PetstoreError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| PetstoreError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps.
    ///
    /// A unique index violation is reported as `PetstoreError::AlreadyExists`.
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId, PetstoreError> {
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        let result = self.inner.insert_one(item).await.map_err(insert_error)?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| PetstoreError::Database("Failed to get inserted ID".into()))
    }

    /// Find one live document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, PetstoreError> {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        self.inner
            .find_one(full_filter)
            .await
            .map_err(|e| PetstoreError::Database(format!("Find failed: {}", e)))
    }

    /// Find live documents by filter, in the given sort order
    pub async fn find_many(&self, filter: Document, sort: Document) -> Result<Vec<T>, PetstoreError> {
        use futures_util::StreamExt;

        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        let cursor = self
            .inner
            .find(full_filter)
            .sort(sort)
            .await
            .map_err(|e| PetstoreError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Upsert one document. `created_at` is only stamped on insert.
    pub async fn upsert_one(
        &self,
        filter: Document,
        mut set: Document,
    ) -> Result<UpdateResult, PetstoreError> {
        let now = DateTime::now();
        set.insert("metadata.updated_at", now);
        set.insert("metadata.is_deleted", false);
        let update = doc! {
            "$set": set,
            "$setOnInsert": { "metadata.created_at": now },
            "$unset": { "metadata.deleted_at": "" },
        };

        self.inner
            .update_one(filter, update)
            .upsert(true)
            .await
            .map_err(|e| PetstoreError::Database(format!("Upsert failed: {}", e)))
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, PetstoreError> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(|e| PetstoreError::Database(format!("Update failed: {}", e)))
    }

    /// Soft delete live documents matching the filter
    pub async fn soft_delete(&self, filter: Document) -> Result<UpdateResult, PetstoreError> {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });
        let update = doc! {
            "$set": {
                "metadata.is_deleted": true,
                "metadata.deleted_at": DateTime::now(),
                "metadata.updated_at": DateTime::now(),
            }
        };

        self.update_one(full_filter, update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::error::{Error, WriteError};
    use std::sync::Arc;

    fn write_error(code: i32) -> Error {
        let write_error: WriteError = bson::from_document(doc! {
            "code": code,
            "errmsg": "E11000 duplicate key error collection: petstore.idempotency_keys",
        })
        .unwrap();
        Error::from(ErrorKind::Write(WriteFailure::WriteError(write_error)))
    }

    #[test]
    fn unique_index_violations_are_duplicates() {
        assert!(is_duplicate_key(&write_error(DUPLICATE_KEY_CODE)));
        assert!(!is_duplicate_key(&write_error(121)));

        let io = Error::from(ErrorKind::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))));
        assert!(!is_duplicate_key(&io));
    }

    #[test]
    fn duplicate_inserts_map_to_already_exists() {
        assert!(matches!(
            insert_error(write_error(DUPLICATE_KEY_CODE)),
            PetstoreError::AlreadyExists(_)
        ));
        assert!(matches!(
            insert_error(write_error(121)),
            PetstoreError::Database(ref m) if m.starts_with("Insert failed")
        ));
    }
}
