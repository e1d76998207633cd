//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per connection and a single
//! `(Method, path)` router.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::pets::{PetCreationService, PetService};
use crate::routes;
use crate::types::PetstoreError;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Catalog use cases (reads, updates, grooming, uploads)
    pub pets: Arc<PetService>,
    /// Idempotent creation front door over the configured orchestrator
    pub creator: Arc<PetCreationService>,
    /// Storage backend label for health output
    pub storage: &'static str,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        pets: Arc<PetService>,
        creator: Arc<PetCreationService>,
        storage: &'static str,
    ) -> Self {
        Self {
            args,
            pets,
            creator,
            storage,
            started_at: Instant::now(),
        }
    }
}

/// Bind the configured address and serve until the process exits
pub async fn run(state: Arc<AppState>) -> Result<(), PetstoreError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Petstore listening on {} (orchestrator: {}, storage: {})",
        state.args.listen,
        state.creator.mode(),
        state.storage
    );
    if state.args.dev_mode {
        warn!("Development mode enabled - infrastructure failures fall back to in-process defaults");
    }

    serve(listener, state).await;
    Ok(())
}

/// Accept loop over an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::OPTIONS, _) => preflight_response(),

        (Method::GET, "/health") => routes::health_check(state),
        (Method::GET, "/ready") => routes::readiness_check(state),
        (Method::GET, "/version") => routes::version_info(),

        (Method::POST, "/v2/pet") => routes::add_pet(state, req).await,
        (Method::PUT, "/v2/pet") => routes::update_pet(state, req).await,
        (Method::GET, "/v2/pet/findByStatus") => {
            routes::find_by_status(state, query.as_deref()).await
        }
        (Method::GET, "/v2/pet/findByTags") => routes::find_by_tags(state, query.as_deref()).await,
        (Method::GET, "/v2/pets") => routes::list_pets(state).await,

        (_, p) if p.starts_with("/v2/pet/") => {
            let rest = p.trim_start_matches("/v2/pet/").trim_end_matches('/').to_string();
            routes::handle_pet_item(state, req, &rest).await
        }

        _ => routes::not_found(&path),
    };

    Ok(to_boxed(response))
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryIdempotencyStore, MemoryPetRepository};
    use crate::workflows::InlinePetOrchestrator;
    use clap::Parser;
    use serde_json::{json, Value};

    async fn spawn_server() -> String {
        let repo = Arc::new(MemoryPetRepository::new());
        let idempotency = Arc::new(MemoryIdempotencyStore::new());
        let service = PetService::new(repo).with_idempotency(idempotency.clone());
        let creator = PetCreationService::new(
            Arc::new(InlinePetOrchestrator::new(service.clone())),
            idempotency,
        );
        let args = Args::parse_from(["petstore", "--dev-mode", "--workflows-disabled"]);
        let state = Arc::new(AppState::new(
            args,
            Arc::new(service),
            Arc::new(creator),
            "memory",
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));
        format!("http://{}", addr)
    }

    fn rex() -> Value {
        json!({"id": 1, "name": "Rex", "photoUrls": ["http://x/rex.jpg"], "tags": [{"id": 1, "name": "good"}]})
    }

    #[tokio::test]
    async fn creates_and_reads_a_pet() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let created = client
            .post(format!("{}/v2/pet", base))
            .header("X-Request-Id", "req-1")
            .json(&rex())
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), 200);
        let body: Value = created.json().await.unwrap();
        assert_eq!(body["name"], "Rex");

        let fetched: Value = client
            .get(format!("{}/v2/pet/1", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(fetched["id"], 1);

        let by_tag: Vec<Value> = client
            .get(format!("{}/v2/pet/findByTags?tags=GOOD,other", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(by_tag.len(), 1);
    }

    #[tokio::test]
    async fn reused_idempotency_key_is_a_conflict() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let first = client
            .post(format!("{}/v2/pet", base))
            .header("Idempotency-Key", "key-1")
            .json(&rex())
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), 200);

        let mut changed = rex();
        changed["name"] = json!("Max");
        let second = client
            .post(format!("{}/v2/pet", base))
            .header("Idempotency-Key", "key-1")
            .json(&changed)
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), 409);
        assert_eq!(
            second.headers()["content-type"],
            routes::problem::PROBLEM_CONTENT_TYPE
        );
        let problem: Value = second.json().await.unwrap();
        assert_eq!(problem["existing"]["petId"], 1);
    }

    #[tokio::test]
    async fn invalid_pets_and_unknown_ids_map_to_problems() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let invalid = client
            .post(format!("{}/v2/pet", base))
            .json(&json!({"id": 2, "name": "", "photoUrls": ["http://x/a.jpg"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(invalid.status(), 400);
        let problem: Value = invalid.json().await.unwrap();
        assert_eq!(problem["type"], "/problems/validation-error");

        let missing = client
            .get(format!("{}/v2/pet/404", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        let bad_id = client
            .get(format!("{}/v2/pet/abc", base))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_id.status(), 400);
    }

    #[tokio::test]
    async fn form_update_and_status_search() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();
        client
            .post(format!("{}/v2/pet", base))
            .json(&rex())
            .send()
            .await
            .unwrap();

        let updated: Value = client
            .post(format!("{}/v2/pet/1", base))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("name=Rex+II&status=sold")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["name"], "Rex II");
        assert_eq!(updated["status"], "sold");

        let sold: Vec<Value> = client
            .get(format!("{}/v2/pet/findByStatus?status=pending&status=sold", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(sold.len(), 1);

        let deleted = client
            .delete(format!("{}/v2/pet/1", base))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), 200);
    }

    #[tokio::test]
    async fn health_reports_orchestrator_and_storage() {
        let base = spawn_server().await;
        let health: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["healthy"], true);
        assert_eq!(health["orchestrator"], "inline");
        assert_eq!(health["storage"], "memory");

        let ready = reqwest::get(format!("{}/ready", base)).await.unwrap();
        assert_eq!(ready.status(), 200);

        let unknown = reqwest::get(format!("{}/nope", base)).await.unwrap();
        assert_eq!(unknown.status(), 404);
    }
}
