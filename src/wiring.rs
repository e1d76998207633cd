//! Collaborator assembly shared by the API and worker binaries

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::adapters::{
    MemoryIdempotencyStore, MemoryPetRepository, MongoIdempotencyStore, MongoPetRepository,
    PartnerClient, PartnerConfig, PartnerSyncer,
};
use crate::config::{Args, EngineKind, PartnerArgs, StorageArgs};
use crate::db::MongoClient;
use crate::durable::{JetStreamEngine, LocalEngine, WorkflowRegistry};
use crate::nats;
use crate::pets::{IdempotencyStore, PartnerSync, PetOrchestrator, PetRepository, PetService};
use crate::types::Result;
use crate::worker::{WorkerConfig, WorkflowWorker};
use crate::workflows::{self, DurablePetOrchestrator, InlinePetOrchestrator, PetActivities};

/// Pet repository and idempotency store over one backend
#[derive(Clone)]
pub struct Storage {
    pub pets: Arc<dyn PetRepository>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// mongodb or memory
    pub backend: &'static str,
}

impl Storage {
    pub fn memory() -> Self {
        Self {
            pets: Arc::new(MemoryPetRepository::new()),
            idempotency: Arc::new(MemoryIdempotencyStore::new()),
            backend: "memory",
        }
    }

    pub async fn mongo(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            pets: Arc::new(MongoPetRepository::new(client).await?),
            idempotency: Arc::new(MongoIdempotencyStore::new(client).await?),
            backend: "mongodb",
        })
    }

    /// Connect the configured backend.
    ///
    /// Without `MONGODB_URI` pets live in memory. A MongoDB that cannot be
    /// reached is fatal unless `dev_mode` is set.
    pub async fn connect(args: &StorageArgs, dev_mode: bool) -> Result<Self> {
        let Some(uri) = args.mongodb_uri.as_deref() else {
            warn!("MONGODB_URI not set, pets are stored in memory");
            return Ok(Self::memory());
        };

        let connected = match MongoClient::new(uri, &args.mongodb_db).await {
            Ok(client) => Self::mongo(&client).await,
            Err(e) => Err(e),
        };
        match connected {
            Ok(storage) => {
                info!("MongoDB connected successfully ({})", args.mongodb_db);
                Ok(storage)
            }
            Err(e) if dev_mode => {
                warn!("MongoDB connection failed (dev mode, using memory): {}", e);
                Ok(Self::memory())
            }
            Err(e) => {
                error!("MongoDB connection failed: {}", e);
                Err(e)
            }
        }
    }

    /// Catalog service with idempotency recording
    pub fn pet_service(&self) -> PetService {
        PetService::new(Arc::clone(&self.pets)).with_idempotency(Arc::clone(&self.idempotency))
    }
}

/// HTTP partner sync, when a partner URL is configured
pub fn partner(args: &PartnerArgs) -> Result<Option<Arc<dyn PartnerSync>>> {
    let Some(base_url) = args.partner_url.clone() else {
        return Ok(None);
    };
    let client = PartnerClient::new(PartnerConfig {
        base_url,
        timeout: args.timeout(),
    })?;
    info!("Partner sync enabled ({})", client.base_url());
    Ok(Some(Arc::new(PartnerSyncer::new(client))))
}

/// Workflow registry over the catalog service and partner
pub fn workflow_registry(
    service: &PetService,
    partner: Option<Arc<dyn PartnerSync>>,
) -> WorkflowRegistry {
    workflows::registry(Arc::new(PetActivities::new(service, partner)))
}

/// Pick the creation orchestrator once at startup.
///
/// The durable path falls back to inline creation when NATS or JetStream
/// cannot be reached, or when the embedded worker that would execute its runs
/// fails to start.
pub async fn orchestrator(
    args: &Args,
    service: &PetService,
    partner: Option<Arc<dyn PartnerSync>>,
) -> Arc<dyn PetOrchestrator> {
    let inline = |partner: Option<Arc<dyn PartnerSync>>| -> Arc<dyn PetOrchestrator> {
        let service = match partner {
            Some(partner) => service.clone().with_partner(partner),
            None => service.clone(),
        };
        Arc::new(InlinePetOrchestrator::new(service))
    };

    if args.workflows_disabled {
        return inline(partner);
    }

    let registry = workflow_registry(service, partner.clone());

    if args.workflow_engine == EngineKind::Local {
        warn!("Local workflow engine: runs do not survive a restart");
        return Arc::new(DurablePetOrchestrator::new(
            Arc::new(LocalEngine::new(registry)),
            args.task_queue.clone(),
        ));
    }

    let client = match nats::connect(&args.nats, "petstore-api").await {
        Ok(client) => client,
        Err(e) => {
            warn!("NATS unreachable, creating pets inline: {}", e);
            return inline(partner);
        }
    };

    let engine =
        match JetStreamEngine::new(client.clone(), args.workflow_result_timeout()).await {
            Ok(engine) => engine,
            Err(e) => {
                warn!("JetStream unavailable, creating pets inline: {}", e);
                return inline(partner);
            }
        };

    if args.embedded_worker {
        if let Err(e) = spawn_embedded_worker(args, client, registry).await {
            warn!("Embedded workflow worker failed to start, creating pets inline: {}", e);
            return inline(partner);
        }
    }

    Arc::new(DurablePetOrchestrator::new(
        Arc::new(engine),
        args.task_queue.clone(),
    ))
}

async fn spawn_embedded_worker(
    args: &Args,
    client: async_nats::Client,
    registry: WorkflowRegistry,
) -> Result<()> {
    let config = WorkerConfig {
        worker_id: format!("petstore-api-{}", uuid::Uuid::new_v4()),
        task_queue: args.task_queue.clone(),
        ..Default::default()
    };

    let worker = WorkflowWorker::new(config, client, registry).await?;
    tokio::spawn(async move {
        if let Err(e) = worker.run().await {
            error!("Embedded workflow worker stopped: {}", e);
        }
    });
    info!("Embedded workflow worker started");
    Ok(())
}
