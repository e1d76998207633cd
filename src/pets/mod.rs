//! Pets bounded context: commands, ports and use cases

pub mod creation;
pub mod fingerprint;
pub mod ports;
pub mod service;
pub mod types;

pub use creation::PetCreationService;
pub use fingerprint::fingerprint_add_pet;
pub use ports::{IdempotencyStore, PartnerSync, PetOrchestrator, PetRepository, RequestContext};
pub use service::PetService;
pub use types::{AddPetCommand, IdempotencyRecord, PetIdentifier, PetMutation, PetProjection};
