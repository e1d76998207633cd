//! JSON and RFC 7807 problem responses

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::types::PetstoreError;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(json) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::from(json)))
            .unwrap(),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("Failed to serialize response")))
                .unwrap()
        }
    }
}

fn problem(status: StatusCode, kind: &str, title: &str, detail: String, extra: Option<(&str, Value)>) -> Response<Full<Bytes>> {
    let mut body = json!({
        "type": format!("/problems/{}", kind),
        "title": title,
        "status": status.as_u16(),
        "detail": detail,
    });
    if let (Some((key, value)), Some(map)) = (extra, body.as_object_mut()) {
        map.insert(key.to_string(), value);
    }

    Response::builder()
        .status(status)
        .header("Content-Type", PROBLEM_CONTENT_TYPE)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

pub fn bad_request(detail: impl Into<String>) -> Response<Full<Bytes>> {
    problem(StatusCode::BAD_REQUEST, "bad-request", "Bad Request", detail.into(), None)
}

pub fn not_found(path: &str) -> Response<Full<Bytes>> {
    problem(
        StatusCode::NOT_FOUND,
        "not-found",
        "Not Found",
        format!("no route for {}", path),
        None,
    )
}

/// Problem document for a service error
pub fn problem_response(err: &PetstoreError) -> Response<Full<Bytes>> {
    let detail = err.to_string();
    match err {
        PetstoreError::Validation(e) => problem(
            StatusCode::BAD_REQUEST,
            "validation-error",
            "Invalid pet",
            detail,
            serde_json::to_value(e).ok().map(|v| ("error", v)),
        ),
        PetstoreError::BadRequest(_) => {
            problem(StatusCode::BAD_REQUEST, "bad-request", "Bad Request", detail, None)
        }
        PetstoreError::NotFound(_) => {
            problem(StatusCode::NOT_FOUND, "not-found", "Pet not found", detail, None)
        }
        PetstoreError::IdempotencyConflict { existing, .. } => problem(
            StatusCode::CONFLICT,
            "idempotency-conflict",
            "Idempotency key already used",
            detail,
            serde_json::to_value(existing.as_ref()).ok().map(|v| ("existing", v)),
        ),
        PetstoreError::PartnerSync { projection, .. } => problem(
            StatusCode::BAD_GATEWAY,
            "partner-sync-failed",
            "Pet stored but partner sync failed",
            detail,
            serde_json::to_value(&projection.pet).ok().map(|v| ("pet", v)),
        ),
        PetstoreError::Partner(_) => {
            problem(StatusCode::BAD_GATEWAY, "partner-error", "Partner API error", detail, None)
        }
        _ => {
            error!(error = %err, "request failed");
            problem(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal-error",
                "Internal Server Error",
                detail,
                None,
            )
        }
    }
}
