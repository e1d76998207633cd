//! Idempotency key document schema
//!
//! One document per client key. The unique index on `key` is what makes
//! concurrent first inserts safe.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::pets::types::IdempotencyRecord;

/// Collection name for idempotency keys
pub const IDEMPOTENCY_KEY_COLLECTION: &str = "pet_idempotency_keys";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IdempotencyKeyDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub key: String,

    /// Fingerprint of the request that first used the key
    pub request_hash: String,

    pub pet_id: i64,
}

impl IdempotencyKeyDoc {
    pub fn from_record(record: &IdempotencyRecord) -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            key: record.key.clone(),
            request_hash: record.request_hash.clone(),
            pet_id: record.pet_id,
        }
    }

    pub fn into_record(self) -> IdempotencyRecord {
        IdempotencyRecord {
            created_at: self.metadata.created(),
            updated_at: self.metadata.updated(),
            key: self.key,
            request_hash: self.request_hash,
            pet_id: self.pet_id,
        }
    }
}

impl IntoIndexes for IdempotencyKeyDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "key": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("key_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for IdempotencyKeyDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
