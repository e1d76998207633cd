//! Petstore - pet catalogue service
//!
//! Pets are created through an idempotent, durable two-step workflow:
//! persist the pet, then push it to a partner API. Either step retries on
//! its own policy and a run interrupted by a crash resumes from its recorded
//! history.
//!
//! ## Components
//!
//! - **Domain**: the `Pet` aggregate and its invariants
//! - **Pets**: commands, ports and use cases, including request fingerprinting
//! - **Adapters**: MongoDB and in-memory storage, the partner HTTP client
//! - **Durable**: workflow engine with activity retries and replayable history
//! - **Workflows**: the pet creation workflow and the inline/durable orchestrators
//! - **Worker**: NATS JetStream consumer executing workflow runs
//! - **Server**: hyper HTTP API

pub mod adapters;
pub mod config;
pub mod db;
pub mod domain;
pub mod durable;
pub mod nats;
pub mod pets;
pub mod routes;
pub mod server;
pub mod types;
pub mod wiring;
pub mod worker;
pub mod workflows;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{PetstoreError, Result};
