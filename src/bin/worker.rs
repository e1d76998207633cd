//! Petstore Worker - executes durable pet workflow runs
//!
//! Run one or more of these next to the API when `EMBEDDED_WORKER=false`.
//! Workers of the same task queue share a JetStream consumer, so each run is
//! delivered to one worker at a time.
//!
//! Usage:
//!   petstore-worker --nats-url nats://localhost:4222 --mongodb-uri mongodb://localhost:27017
//!
//! Environment variables:
//!   NATS_URL - NATS server URL (default: nats://127.0.0.1:4222)
//!   MONGODB_URI / MONGODB_DB - pet storage shared with the API
//!   PARTNER_URL - partner API base URL (optional)
//!   WORKER_ID - Unique worker identifier (default: auto-generated UUID)
//!   TASK_QUEUE - queue to consume (default: PET_CREATION)
//!   MAX_CONCURRENT - Maximum runs in flight (default: 10)

use clap::Parser;
use std::sync::Arc;
use petstore::config::{NatsArgs, PartnerArgs, StorageArgs};
use petstore::nats;
use petstore::wiring::{self, Storage};
use petstore::worker::{WorkerConfig, WorkflowWorker};
use petstore::workflows::DEFAULT_TASK_QUEUE;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "petstore-worker")]
#[command(about = "Durable workflow worker for petstore")]
#[command(version)]
struct Args {
    #[command(flatten)]
    storage: StorageArgs,

    #[command(flatten)]
    nats: NatsArgs,

    #[command(flatten)]
    partner: PartnerArgs,

    /// Unique worker ID (auto-generated if not provided)
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Task queue to consume
    #[arg(long, env = "TASK_QUEUE", default_value = DEFAULT_TASK_QUEUE)]
    task_queue: String,

    /// Maximum concurrent runs
    #[arg(long, env = "MAX_CONCURRENT", default_value = "10")]
    max_concurrent: usize,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,petstore=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if let Err(e) = args.partner.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = WorkerConfig {
        worker_id: args
            .worker_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        task_queue: args.task_queue,
        max_concurrent: args.max_concurrent,
    };

    info!(
        "Starting petstore worker {} (NATS: {}, queue: {})",
        config.worker_id, args.nats.nats_url, config.task_queue
    );

    let storage = match Storage::connect(&args.storage, false).await {
        Ok(storage) => storage,
        Err(_) => std::process::exit(1),
    };
    let partner = match wiring::partner(&args.partner) {
        Ok(partner) => partner,
        Err(e) => {
            error!("Partner client setup failed: {}", e);
            std::process::exit(1);
        }
    };
    let registry = wiring::workflow_registry(&storage.pet_service(), partner);

    let client = match nats::connect(&args.nats, &format!("petstore-worker-{}", config.worker_id)).await {
        Ok(client) => client,
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(1);
        }
    };

    match WorkflowWorker::new(config, client, registry).await {
        Ok(worker) => {
            let worker = Arc::new(worker);
            let runner = Arc::clone(&worker);
            let mut worker_handle = tokio::spawn(async move {
                if let Err(e) = runner.run().await {
                    error!("Worker error: {}", e);
                }
            });

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, finishing in-flight runs");
                    worker.stop().await;
                    if let Err(e) = (&mut worker_handle).await {
                        error!("Worker task error: {}", e);
                    }
                }
                result = &mut worker_handle => {
                    if let Err(e) = result {
                        error!("Worker task error: {}", e);
                    }
                }
            }

            info!("Worker shutting down");
        }
        Err(e) => {
            error!("Failed to create worker: {}", e);
            std::process::exit(1);
        }
    }
}
