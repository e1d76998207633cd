//! Partner API client and sync adapter
//!
//! The partner accepts `POST {base}/pets/{reference}` with a simplified pet
//! payload. It has no idempotency support of its own; retries are governed by
//! the calling activity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::Pet;
use crate::pets::ports::PartnerSync;
use crate::types::{PetstoreError, Result};

/// Pet shape exchanged with the partner API
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PetPayload {
    pub reference: String,
    pub title: String,
    pub photos: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    pub availability: String,
}

impl PetPayload {
    /// Map the local aggregate into the partner shape.
    ///
    /// Tags become `name -> "true"` labels, external attributes are merged on top.
    pub fn from_pet(pet: &Pet) -> Self {
        let mut labels: HashMap<String, String> = pet
            .tags
            .iter()
            .map(|tag| (tag.name.clone(), "true".to_string()))
            .collect();
        if let Some(reference) = &pet.external_ref {
            for (key, value) in &reference.attributes {
                labels.insert(key.clone(), value.clone());
            }
        }

        Self {
            reference: pet.id.to_string(),
            title: pet.name.clone(),
            photos: pet.photo_urls.clone(),
            labels,
            availability: pet.status.as_str().to_uppercase(),
        }
    }
}

/// Partner client configuration
#[derive(Debug, Clone)]
pub struct PartnerConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for PartnerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP client for the partner API
#[derive(Clone)]
pub struct PartnerClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl PartnerClient {
    pub fn new(config: PartnerConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PetstoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Push a payload to the partner
    pub async fn sync_pet(&self, payload: &PetPayload) -> Result<()> {
        let endpoint = format!("{}/pets/{}", self.base_url, payload.reference);
        debug!(endpoint = %endpoint, "calling partner API");

        let response = self
            .http_client
            .post(&endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| PetstoreError::Partner(format!("call partner API: {}", e)))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint = %endpoint, status = %status, "partner API rejected sync");
            return Err(PetstoreError::Partner(format!("{} - {}", status, body.trim())));
        }

        Ok(())
    }
}

/// `PartnerSync` port backed by the HTTP client
pub struct PartnerSyncer {
    client: PartnerClient,
}

impl PartnerSyncer {
    pub fn new(client: PartnerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PartnerSync for PartnerSyncer {
    async fn sync(&self, pet: &Pet) -> Result<()> {
        self.client.sync_pet(&PetPayload::from_pet(pet)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExternalReference, Status, Tag};
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    async fn spawn_partner(status: StatusCode) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let captured = captured.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let captured = captured.clone();
                        async move {
                            let path = req.uri().path().to_string();
                            let body = req.into_body().collect().await?.to_bytes();
                            let json = serde_json::from_slice(&body)
                                .unwrap_or(serde_json::Value::Null);
                            captured.lock().await.push((path, json));
                            Ok::<_, hyper::Error>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from("  partner says no \n")))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        (format!("http://{}/", addr), seen)
    }

    fn pet() -> Pet {
        let mut pet = Pet::new(7, "Rex", vec!["http://x/rex.jpg".into()]).unwrap();
        pet.status = Status::Pending;
        pet.replace_tags(vec![Tag {
            id: 1,
            name: "friendly".into(),
        }]);
        pet.update_external_reference(Some(ExternalReference {
            provider: "partner".into(),
            id: "7".into(),
            attributes: HashMap::from([("color".to_string(), "brown".to_string())]),
        }));
        pet
    }

    #[test]
    fn payload_maps_tags_attributes_and_availability() {
        let payload = PetPayload::from_pet(&pet());
        assert_eq!(payload.reference, "7");
        assert_eq!(payload.title, "Rex");
        assert_eq!(payload.availability, "PENDING");
        assert_eq!(payload.labels.get("friendly").map(String::as_str), Some("true"));
        assert_eq!(payload.labels.get("color").map(String::as_str), Some("brown"));
    }

    #[tokio::test]
    async fn sync_posts_payload_to_reference_path() {
        let (base_url, seen) = spawn_partner(StatusCode::OK).await;
        let client = PartnerClient::new(PartnerConfig {
            base_url,
            ..Default::default()
        })
        .unwrap();

        PartnerSyncer::new(client).sync(&pet()).await.unwrap();

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "/pets/7");
        assert_eq!(seen[0].1["title"], "Rex");
        assert_eq!(seen[0].1["availability"], "PENDING");
    }

    #[tokio::test]
    async fn error_status_includes_response_body() {
        let (base_url, _) = spawn_partner(StatusCode::SERVICE_UNAVAILABLE).await;
        let client = PartnerClient::new(PartnerConfig {
            base_url,
            ..Default::default()
        })
        .unwrap();

        let err = client.sync_pet(&PetPayload::from_pet(&pet())).await.unwrap_err();
        match err {
            PetstoreError::Partner(message) => {
                assert!(message.contains("503"));
                assert!(message.ends_with("partner says no"));
            }
            other => panic!("expected partner error, got {other:?}"),
        }
    }
}
