//! NATS connection setup

use async_nats::{Client, ConnectOptions};
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::{PetstoreError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Connect to NATS, failing fast when the server is unreachable.
///
/// Reconnection still applies once the first connection succeeded.
pub async fn connect(args: &NatsArgs, name: &str) -> Result<Client> {
    info!("Connecting to NATS at {}", args.nats_url);

    let mut options = ConnectOptions::new()
        .name(name)
        .ping_interval(DEFAULT_PING_INTERVAL)
        .connection_timeout(Duration::from_secs(5));

    if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
        options = options.user_and_password(user.clone(), pass.clone());
    }

    let client = options
        .connect(&args.nats_url)
        .await
        .map_err(|e| PetstoreError::Nats(format!("Failed to connect: {}", e)))?;

    info!("Connected to NATS at {} as {}", args.nats_url, name);
    Ok(client)
}
