//! Pet aggregate
//!
//! Holds the catalog invariants: a pet always has a name and at least one
//! photo, hair length is never negative, and grooming never trims more than
//! the measured length.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a pet inside the store catalog
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Available,
    Pending,
    Sold,
}

impl Status {
    /// Parse a status value. Empty input means `available`, anything unknown is rejected.
    pub fn parse(value: &str) -> Result<Self, PetError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "available" => Ok(Status::Available),
            "pending" => Ok(Status::Pending),
            "sold" => Ok(Status::Sold),
            other => Err(PetError::InvalidStatus(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Available => "available",
            Status::Pending => "pending",
            Status::Sold => "sold",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain invariant violations
#[derive(Error, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum PetError {
    #[error("pet name is required")]
    EmptyName,
    #[error("at least one photo url is required")]
    EmptyPhotos,
    #[error("hair length must be greater or equal to zero")]
    InvalidHair,
    #[error("grooming operation must have a trim less than or equal to the initial length")]
    InvalidGrooming,
    #[error("unknown pet status '{0}'")]
    InvalidStatus(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// Link between a local pet and a record held by an external provider
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ExternalReference {
    pub provider: String,
    pub id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Transient measurement used to compute a new hair length
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroomingOperation {
    pub initial_length_cm: f64,
    pub trim_by_cm: f64,
}

/// The aggregate managed by the pets bounded context
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pet {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub name: String,
    pub photo_urls: Vec<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub hair_length_cm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<ExternalReference>,
}

impl Pet {
    /// Build a new pet, enforcing the name and photo invariants
    pub fn new(id: i64, name: &str, photo_urls: Vec<String>) -> Result<Self, PetError> {
        let mut pet = Pet {
            id,
            ..Default::default()
        };
        pet.rename(name)?;
        pet.replace_photos(photo_urls)?;
        Ok(pet)
    }

    pub fn rename(&mut self, name: &str) -> Result<(), PetError> {
        if name.trim().is_empty() {
            return Err(PetError::EmptyName);
        }
        self.name = name.to_string();
        Ok(())
    }

    pub fn replace_photos(&mut self, urls: Vec<String>) -> Result<(), PetError> {
        if urls.is_empty() {
            return Err(PetError::EmptyPhotos);
        }
        self.photo_urls = urls;
        Ok(())
    }

    pub fn update_hair_length(&mut self, length_cm: f64) -> Result<(), PetError> {
        if length_cm < 0.0 {
            return Err(PetError::InvalidHair);
        }
        self.hair_length_cm = length_cm;
        Ok(())
    }

    /// Apply a grooming operation, keeping only the resulting length
    pub fn groom(&mut self, op: GroomingOperation) -> Result<(), PetError> {
        if op.initial_length_cm < 0.0 || op.trim_by_cm < 0.0 {
            return Err(PetError::InvalidHair);
        }
        if op.trim_by_cm > op.initial_length_cm {
            return Err(PetError::InvalidGrooming);
        }
        self.update_hair_length(op.initial_length_cm - op.trim_by_cm)
    }

    pub fn update_status(&mut self, status: &str) -> Result<(), PetError> {
        self.status = Status::parse(status)?;
        Ok(())
    }

    pub fn replace_tags(&mut self, tags: Vec<Tag>) {
        self.tags = tags;
    }

    pub fn update_category(&mut self, category: Option<Category>) {
        self.category = category;
    }

    pub fn update_external_reference(&mut self, reference: Option<ExternalReference>) {
        self.external_ref = reference;
    }

    /// Whether any tag matches one of the given lowercase names
    pub fn has_any_tag(&self, lowercase_names: &[String]) -> bool {
        self.tags
            .iter()
            .any(|tag| lowercase_names.contains(&tag.name.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rex() -> Pet {
        Pet::new(1, "Rex", vec!["http://x/rex.jpg".into()]).unwrap()
    }

    #[test]
    fn new_pet_requires_name_and_photos() {
        assert_eq!(
            Pet::new(1, "   ", vec!["a".into()]).unwrap_err(),
            PetError::EmptyName
        );
        assert_eq!(Pet::new(1, "Rex", vec![]).unwrap_err(), PetError::EmptyPhotos);
        assert_eq!(rex().status, Status::Available);
    }

    #[test]
    fn groom_rejects_trim_longer_than_initial() {
        let mut pet = rex();
        let err = pet
            .groom(GroomingOperation {
                initial_length_cm: 2.0,
                trim_by_cm: 3.0,
            })
            .unwrap_err();
        assert_eq!(err, PetError::InvalidGrooming);
        assert_eq!(pet.hair_length_cm, 0.0);
    }

    #[test]
    fn groom_rejects_negative_measurements() {
        let mut pet = rex();
        let err = pet
            .groom(GroomingOperation {
                initial_length_cm: -1.0,
                trim_by_cm: 0.0,
            })
            .unwrap_err();
        assert_eq!(err, PetError::InvalidHair);
    }

    #[test]
    fn groom_keeps_the_remaining_length() {
        let mut pet = rex();
        pet.groom(GroomingOperation {
            initial_length_cm: 5.0,
            trim_by_cm: 1.5,
        })
        .unwrap();
        assert_eq!(pet.hair_length_cm, 3.5);
    }

    #[test]
    fn status_defaults_when_empty_and_rejects_unknown_values() {
        let mut pet = rex();
        pet.update_status("SOLD").unwrap();
        assert_eq!(pet.status, Status::Sold);
        pet.update_status("").unwrap();
        assert_eq!(pet.status, Status::Available);
        assert_eq!(
            pet.update_status("adopted").unwrap_err(),
            PetError::InvalidStatus("adopted".into())
        );
        assert_eq!(pet.status, Status::Available);
    }

    #[test]
    fn tag_lookup_is_case_insensitive() {
        let mut pet = rex();
        pet.replace_tags(vec![Tag {
            id: 1,
            name: "Friendly".into(),
        }]);
        assert!(pet.has_any_tag(&["friendly".to_string()]));
        assert!(!pet.has_any_tag(&["shy".to_string()]));
    }
}
