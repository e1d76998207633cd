//! HTTP routes for petstore

pub mod health;
pub mod pets;
pub mod problem;

pub use health::{health_check, readiness_check, version_info};
pub use pets::{add_pet, find_by_status, find_by_tags, handle_pet_item, list_pets, update_pet};
pub use problem::{bad_request, json_response, not_found, problem_response};
