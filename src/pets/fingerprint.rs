//! Deterministic request fingerprints for idempotent pet creation
//!
//! The fingerprint is the hex SHA-256 of a canonical JSON rendering of the
//! add-pet payload. The idempotency key itself is excluded, and unordered
//! collections (tags, external attributes) are sorted first so two logically
//! identical requests always hash the same.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::types::{AddPetCommand, CategoryInput, ExternalReferenceInput, TagInput};
use crate::types::Result;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalAddPet<'a> {
    id: i64,
    name: Option<&'a str>,
    photo_urls: Option<&'a [String]>,
    category: Option<CanonicalCategory<'a>>,
    tags: Option<Vec<CanonicalTag<'a>>>,
    status: Option<&'a str>,
    hair_length_cm: Option<f64>,
    external_reference: Option<CanonicalExternalReference<'a>>,
}

#[derive(Serialize)]
struct CanonicalCategory<'a> {
    id: i64,
    name: &'a str,
}

#[derive(Serialize)]
struct CanonicalTag<'a> {
    id: i64,
    name: &'a str,
}

#[derive(Serialize)]
struct CanonicalExternalReference<'a> {
    provider: &'a str,
    id: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<CanonicalAttribute<'a>>,
}

#[derive(Serialize)]
struct CanonicalAttribute<'a> {
    key: &'a str,
    value: &'a str,
}

/// Fingerprint an add-pet command, ignoring its idempotency key
pub fn fingerprint_add_pet(command: &AddPetCommand) -> Result<String> {
    let pet = &command.pet;
    let canonical = CanonicalAddPet {
        id: pet.id,
        name: pet.name.as_deref(),
        photo_urls: pet.photo_urls.as_deref(),
        category: pet.category.as_ref().map(canonical_category),
        tags: pet.tags.as_deref().map(canonical_tags),
        status: pet.status.as_deref(),
        hair_length_cm: pet.hair_length_cm,
        external_reference: pet
            .external_reference
            .as_ref()
            .map(canonical_external_reference),
    };

    let payload = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&payload)))
}

fn canonical_category(category: &CategoryInput) -> CanonicalCategory<'_> {
    CanonicalCategory {
        id: category.id,
        name: &category.name,
    }
}

fn canonical_tags(tags: &[TagInput]) -> Vec<CanonicalTag<'_>> {
    let mut canonical: Vec<CanonicalTag<'_>> = tags
        .iter()
        .map(|t| CanonicalTag {
            id: t.id,
            name: &t.name,
        })
        .collect();
    canonical.sort_by(|a, b| a.name.cmp(b.name).then(a.id.cmp(&b.id)));
    canonical
}

fn canonical_external_reference(
    reference: &ExternalReferenceInput,
) -> CanonicalExternalReference<'_> {
    let mut attributes: Vec<CanonicalAttribute<'_>> = reference
        .attributes
        .iter()
        .map(|(key, value)| CanonicalAttribute {
            key: key.as_str(),
            value: value.as_str(),
        })
        .collect();
    attributes.sort_by(|a, b| a.key.cmp(b.key));

    CanonicalExternalReference {
        provider: &reference.provider,
        id: &reference.id,
        attributes,
    }
}
