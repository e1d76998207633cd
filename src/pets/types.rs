//! Commands, queries and projections exchanged with the pets service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::Pet;
use crate::types::{PetstoreError, Result};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CategoryInput {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TagInput {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ExternalReferenceInput {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Full set of fields used to create or replace a pet.
///
/// `None` means "leave as is" on updates; on creation `name` and
/// `photo_urls` are mandatory.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PetMutation {
    #[serde(default)]
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<TagInput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hair_length_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<ExternalReferenceInput>,
}

/// Request to add a pet, optionally scoped by a client idempotency key
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AddPetCommand {
    pub pet: PetMutation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl AddPetCommand {
    /// The trimmed idempotency key, if a non-blank one was supplied
    pub fn key(&self) -> Option<&str> {
        self.idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Simplified form update
#[derive(Clone, Debug, Default)]
pub struct UpdatePetWithForm {
    pub id: i64,
    pub name: Option<String>,
    pub status: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroomPetCommand {
    #[serde(default)]
    pub id: i64,
    pub initial_hair_length_cm: f64,
    pub trim_by_cm: f64,
}

#[derive(Clone, Debug, Default)]
pub struct UploadImageCommand {
    pub id: i64,
    pub filename: String,
    pub metadata: Option<String>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct UploadImageResult {
    pub code: i32,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PetIdentifier {
    pub id: i64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PetMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A pet paired with its persistence timestamps
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PetProjection {
    pub pet: Pet,
    pub metadata: PetMetadata,
}

/// Association between a client key and the pet it created
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub pet_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Record to be stored; timestamps are stamped by the store
    pub fn new(key: &str, request_hash: &str, pet_id: i64) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            request_hash: request_hash.to_string(),
            pet_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether another record describes the same request outcome
    pub fn matches(&self, other: &IdempotencyRecord) -> bool {
        self.request_hash == other.request_hash && self.pet_id == other.pet_id
    }

    /// Resolve a save against the record already stored under the same key
    pub fn reconcile(self, candidate: &IdempotencyRecord) -> Result<IdempotencyRecord> {
        if self.matches(candidate) {
            return Ok(self);
        }
        Err(PetstoreError::IdempotencyConflict {
            key: candidate.key.clone(),
            existing: Box::new(self),
        })
    }
}
