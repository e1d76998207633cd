//! Configuration for petstore
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::workflows::DEFAULT_TASK_QUEUE;

/// Petstore - pet catalogue API with durable creation workflows
#[derive(Parser, Debug, Clone)]
#[command(name = "petstore")]
#[command(about = "Pet catalogue API with idempotent, durable pet creation")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (infrastructure failures fall back instead of exiting)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub nats: NatsArgs,

    #[command(flatten)]
    pub partner: PartnerArgs,

    /// Create pets inline instead of through a durable workflow
    #[arg(long, env = "WORKFLOWS_DISABLED", default_value = "false")]
    pub workflows_disabled: bool,

    /// Durable workflow engine
    #[arg(long, env = "WORKFLOW_ENGINE", value_enum, default_value_t = EngineKind::Jetstream)]
    pub workflow_engine: EngineKind,

    /// Task queue that pet creation runs are published to
    #[arg(long, env = "TASK_QUEUE", default_value = DEFAULT_TASK_QUEUE)]
    pub task_queue: String,

    /// Run a workflow worker inside the API process
    #[arg(long, env = "EMBEDDED_WORKER", default_value_t = true, action = clap::ArgAction::Set)]
    pub embedded_worker: bool,

    /// How long a create request waits for its durable run to finish
    #[arg(long, env = "WORKFLOW_RESULT_TIMEOUT_MS", default_value = "120000")]
    pub workflow_result_timeout_ms: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// NATS JetStream backed runs, executed by workers
    Jetstream,
    /// In-process runs; history is lost on restart
    Local,
}

/// Pet and idempotency storage
#[derive(Parser, Debug, Clone)]
pub struct StorageArgs {
    /// MongoDB connection URI; in-memory storage when unset
    #[arg(long, env = "MONGODB_URI")]
    pub mongodb_uri: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "petstore")]
    pub mongodb_db: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

/// Partner API configuration
#[derive(Parser, Debug, Clone)]
pub struct PartnerArgs {
    /// Partner API base URL; partner sync is skipped when unset
    #[arg(long, env = "PARTNER_URL")]
    pub partner_url: Option<String>,

    /// Partner request timeout in milliseconds
    #[arg(long, env = "PARTNER_TIMEOUT_MS", default_value = "5000")]
    pub partner_timeout_ms: u64,
}

impl PartnerArgs {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.partner_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("PARTNER_URL must be an http(s) URL, got '{}'", url));
            }
        }
        if self.partner_timeout_ms == 0 {
            return Err("PARTNER_TIMEOUT_MS must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.partner_timeout_ms)
    }
}

impl Args {
    /// Whether creation runs through the JetStream engine
    pub fn uses_jetstream(&self) -> bool {
        !self.workflows_disabled && self.workflow_engine == EngineKind::Jetstream
    }

    pub fn workflow_result_timeout(&self) -> Duration {
        Duration::from_millis(self.workflow_result_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.partner.validate()?;

        if self.task_queue.trim().is_empty() {
            return Err("TASK_QUEUE must not be empty".to_string());
        }

        if self.workflow_result_timeout_ms == 0 {
            return Err("WORKFLOW_RESULT_TIMEOUT_MS must be greater than zero".to_string());
        }

        // A separate worker process cannot see this process's memory
        if self.uses_jetstream()
            && self.storage.mongodb_uri.is_none()
            && !self.embedded_worker
            && !self.dev_mode
        {
            return Err(
                "MONGODB_URI is required when JetStream runs are executed by external workers"
                    .to_string(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["petstore"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults_are_valid() {
        let args = parse(&[]);
        assert_eq!(args.task_queue, "PET_CREATION");
        assert_eq!(args.workflow_engine, EngineKind::Jetstream);
        assert!(args.embedded_worker);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn partner_url_must_be_http() {
        let args = parse(&["--partner-url", "ftp://partner"]);
        assert!(args.validate().unwrap_err().contains("PARTNER_URL"));
    }

    #[test]
    fn external_workers_need_shared_storage() {
        let args = parse(&["--embedded-worker", "false"]);
        assert!(args.validate().unwrap_err().contains("MONGODB_URI"));

        let local = parse(&["--embedded-worker", "false", "--workflow-engine", "local"]);
        assert!(local.validate().is_ok());
    }
}
