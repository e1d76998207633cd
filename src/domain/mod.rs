//! Pets domain model

mod pet;

pub use pet::{Category, ExternalReference, GroomingOperation, Pet, PetError, Status, Tag};
