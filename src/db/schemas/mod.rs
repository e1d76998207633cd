//! Database schemas for petstore
//!
//! MongoDB document structures for pets and idempotency keys.

mod idempotency_key;
mod metadata;
mod pet;

pub use idempotency_key::{IdempotencyKeyDoc, IDEMPOTENCY_KEY_COLLECTION};
pub use metadata::Metadata;
pub use pet::{PetDoc, PET_COLLECTION};
