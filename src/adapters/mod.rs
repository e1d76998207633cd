//! Adapters implementing the pets ports

pub mod memory;
pub mod mongo;
pub mod partner;

pub use memory::{MemoryIdempotencyStore, MemoryPetRepository};
pub use mongo::{MongoIdempotencyStore, MongoPetRepository};
pub use partner::{PartnerClient, PartnerConfig, PartnerSyncer, PetPayload};
