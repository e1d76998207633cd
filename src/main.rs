//! Petstore - pet catalogue API with idempotent, durable pet creation

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use petstore::{
    config::Args,
    pets::PetCreationService,
    server::{self, AppState},
    wiring::{self, Storage},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("petstore={},info", log_level).into());
    if args.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Petstore - pet catalogue API");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!(
        "Storage: {}",
        if args.storage.mongodb_uri.is_some() { "mongodb" } else { "memory" }
    );
    if args.workflows_disabled {
        info!("Workflows: disabled (inline creation)");
    } else {
        info!("Workflows: {:?} engine, queue {}", args.workflow_engine, args.task_queue);
    }
    info!(
        "Partner: {}",
        args.partner.partner_url.as_deref().unwrap_or("not configured")
    );
    info!("======================================");

    let storage = match Storage::connect(&args.storage, args.dev_mode).await {
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

    let service = storage.pet_service();
    let orchestrator = wiring::orchestrator(&args, &service, partner).await;
    let creator = PetCreationService::new(orchestrator, Arc::clone(&storage.idempotency));
    info!("Pet creation mode: {}", creator.mode());

    let state = Arc::new(AppState::new(
        args,
        Arc::new(service),
        Arc::new(creator),
        storage.backend,
    ));

    server::run(state).await?;
    Ok(())
}
