//! Health check endpoints
//!
//! - /health - Liveness probe, 200 whenever the process is serving
//! - /ready - Readiness probe, 503 until storage and the orchestrator are usable
//! - /version - Build information

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    /// 'online' or 'degraded'
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime: u64,
    pub timestamp: String,
    /// development or production
    pub mode: &'static str,
    /// Storage backend serving pets (mongodb or memory)
    pub storage: &'static str,
    /// How pet creation is orchestrated (inline, durable-jetstream, durable-local)
    pub orchestrator: &'static str,
    pub partner_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let args = &state.args;
    let orchestrator = state.creator.mode();

    // Durable mode was requested but the server fell back to inline
    let degraded = !args.workflows_disabled && orchestrator == "inline";
    let error = degraded.then(|| "durable workflows unavailable, running inline".to_string());

    HealthResponse {
        healthy: true,
        status: if degraded { "degraded" } else { "online" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if args.dev_mode {
            "development"
        } else {
            "production"
        },
        storage: state.storage,
        orchestrator,
        partner_configured: args.partner.partner_url.is_some(),
        error,
    }
}

fn json_body(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Handle liveness probe (/health)
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state);
    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());
    json_body(StatusCode::OK, body)
}

/// Handle readiness probe (/ready)
///
/// In production an in-memory store is not considered ready: pets would not
/// survive a restart.
pub fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state);
    let is_ready = state.args.dev_mode || response.storage != "memory";

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":false,"error":"Serialization failed"}"#.to_string());
    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_body(status, body)
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "petstore",
    };
    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"version":"unknown","commit":"unknown"}"#.to_string());
    json_body(StatusCode::OK, body)
}
