//! Pet document schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::domain::Pet;
use crate::pets::types::{PetMetadata, PetProjection};

/// Collection name for pets
pub const PET_COLLECTION: &str = "pets";

/// Pet document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PetDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Catalog id, unique per pet
    pub pet_id: i64,

    /// The aggregate as last saved
    pub pet: Pet,

    /// Lowercased tag names for case-insensitive tag search
    #[serde(default)]
    pub tag_keys: Vec<String>,
}

impl PetDoc {
    pub fn tag_keys(pet: &Pet) -> Vec<String> {
        pet.tags.iter().map(|t| t.name.to_lowercase()).collect()
    }

    pub fn into_projection(self) -> PetProjection {
        PetProjection {
            metadata: PetMetadata {
                created_at: self.metadata.created(),
                updated_at: self.metadata.updated(),
            },
            pet: self.pet,
        }
    }
}

impl IntoIndexes for PetDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "pet_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("pet_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "pet.status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "tag_keys": 1 },
                Some(
                    IndexOptions::builder()
                        .name("tag_keys_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for PetDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
