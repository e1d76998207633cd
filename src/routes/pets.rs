//! Pet catalog endpoints
//!
//! Handlers return `Full<Bytes>` responses; the server boxes them. Every
//! service error is rendered as a problem document.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

use super::problem::{bad_request, json_response, not_found, problem_response};
use crate::domain::Pet;
use crate::pets::types::{
    AddPetCommand, GroomPetCommand, PetIdentifier, PetMutation, PetProjection, UpdatePetWithForm,
    UploadImageCommand,
};
use crate::pets::RequestContext;
use crate::server::AppState;
use crate::types::Result;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

fn header_value(req: &Request<Incoming>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn read_body(req: Request<Incoming>) -> std::result::Result<Bytes, Response<Full<Bytes>>> {
    match req.into_body().collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => Err(bad_request(format!("Failed to read body: {}", e))),
    }
}

async fn read_json<T: DeserializeOwned>(
    req: Request<Incoming>,
) -> std::result::Result<T, Response<Full<Bytes>>> {
    let body = read_body(req).await?;
    serde_json::from_slice(&body).map_err(|e| bad_request(format!("Invalid JSON: {}", e)))
}

/// Decode `application/x-www-form-urlencoded` pairs, keeping repeats
fn form_pairs(input: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(input).unwrap_or_default()
}

/// Values for `key`, accepting repeated keys and comma separated lists
pub fn multi_value(pairs: &[(String, String)], key: &str) -> Vec<String> {
    pairs
        .iter()
        .filter(|(k, _)| k == key)
        .flat_map(|(_, v)| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn single_value(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

fn pet_response(result: Result<PetProjection>) -> Response<Full<Bytes>> {
    match result {
        Ok(projection) => json_response(StatusCode::OK, &projection.pet),
        Err(e) => problem_response(&e),
    }
}

fn pets_response(result: Result<Vec<PetProjection>>) -> Response<Full<Bytes>> {
    match result {
        Ok(projections) => {
            let pets: Vec<Pet> = projections.into_iter().map(|p| p.pet).collect();
            json_response(StatusCode::OK, &pets)
        }
        Err(e) => problem_response(&e),
    }
}

/// POST /v2/pet
pub async fn add_pet(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let idempotency_key = header_value(&req, IDEMPOTENCY_KEY_HEADER);
    let ctx = RequestContext {
        trace_id: header_value(&req, REQUEST_ID_HEADER),
    };
    let pet: PetMutation = match read_json(req).await {
        Ok(pet) => pet,
        Err(response) => return response,
    };

    let command = AddPetCommand {
        pet,
        idempotency_key,
    };
    pet_response(state.creator.create_pet(&ctx, command).await)
}

/// PUT /v2/pet
pub async fn update_pet(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let mutation: PetMutation = match read_json(req).await {
        Ok(mutation) => mutation,
        Err(response) => return response,
    };
    pet_response(state.pets.update_pet(&mutation).await)
}

/// GET /v2/pet/findByStatus
pub async fn find_by_status(state: Arc<AppState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let statuses = multi_value(&form_pairs(query.unwrap_or_default()), "status");
    pets_response(state.pets.find_by_status(&statuses).await)
}

/// GET /v2/pet/findByTags
pub async fn find_by_tags(state: Arc<AppState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let tags = multi_value(&form_pairs(query.unwrap_or_default()), "tags");
    pets_response(state.pets.find_by_tags(&tags).await)
}

/// GET /v2/pets
pub async fn list_pets(state: Arc<AppState>) -> Response<Full<Bytes>> {
    pets_response(state.pets.list().await)
}

/// Routes under `/v2/pet/{id}`
pub async fn handle_pet_item(
    state: Arc<AppState>,
    req: Request<Incoming>,
    rest: &str,
) -> Response<Full<Bytes>> {
    let (id_part, action) = match rest.split_once('/') {
        Some((id, action)) => (id, Some(action)),
        None => (rest, None),
    };
    let id = match id_part.parse::<i64>() {
        Ok(id) => id,
        Err(_) => return bad_request(format!("invalid pet id '{}'", id_part)),
    };

    match (req.method().clone(), action) {
        (Method::GET, None) => pet_response(state.pets.get_by_id(PetIdentifier { id }).await),
        (Method::DELETE, None) => match state.pets.delete(PetIdentifier { id }).await {
            Ok(()) => Response::builder()
                .status(StatusCode::OK)
                .header("Access-Control-Allow-Origin", "*")
                .body(Full::new(Bytes::new()))
                .unwrap(),
            Err(e) => problem_response(&e),
        },
        (Method::POST, None) => update_with_form(state, req, id).await,
        (Method::POST, Some("groom")) => groom_pet(state, req, id).await,
        (Method::POST, Some("uploadImage")) => upload_image(state, req, id).await,
        _ => not_found(&format!("/v2/pet/{}", rest)),
    }
}

async fn update_with_form(
    state: Arc<AppState>,
    req: Request<Incoming>,
    id: i64,
) -> Response<Full<Bytes>> {
    let mut pairs = form_pairs(req.uri().query().unwrap_or_default());
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    if let Ok(body) = std::str::from_utf8(&body) {
        pairs.extend(form_pairs(body));
    }

    let form = UpdatePetWithForm {
        id,
        name: single_value(&pairs, "name"),
        status: single_value(&pairs, "status"),
    };
    pet_response(state.pets.update_pet_with_form(&form).await)
}

async fn groom_pet(state: Arc<AppState>, req: Request<Incoming>, id: i64) -> Response<Full<Bytes>> {
    let mut command: GroomPetCommand = match read_json(req).await {
        Ok(command) => command,
        Err(response) => return response,
    };
    command.id = id;
    pet_response(state.pets.groom_pet(&command).await)
}

async fn upload_image(
    state: Arc<AppState>,
    req: Request<Incoming>,
    id: i64,
) -> Response<Full<Bytes>> {
    let pairs = form_pairs(req.uri().query().unwrap_or_default());
    let Some(filename) = single_value(&pairs, "filename").filter(|f| !f.trim().is_empty()) else {
        return bad_request("filename is required");
    };
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    debug!(pet_id = id, filename = %filename, bytes = body.len(), "image upload received");

    let command = UploadImageCommand {
        id,
        filename,
        metadata: single_value(&pairs, "additionalMetadata"),
    };
    match state.pets.upload_image(&command).await {
        Ok(result) => json_response(StatusCode::OK, &result),
        Err(e) => problem_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_values_accept_repeats_and_commas() {
        let pairs = form_pairs("status=available,pending&status=sold&other=x&status=");
        assert_eq!(
            multi_value(&pairs, "status"),
            vec!["available", "pending", "sold"]
        );
        assert!(multi_value(&pairs, "tags").is_empty());
    }

    #[test]
    fn form_values_are_url_decoded() {
        let pairs = form_pairs("name=Mr+Whiskers&status=sold");
        assert_eq!(single_value(&pairs, "name").as_deref(), Some("Mr Whiskers"));
        assert_eq!(single_value(&pairs, "status").as_deref(), Some("sold"));
        assert_eq!(single_value(&pairs, "missing"), None);
    }
}
