//! Worker module - workflow run execution
//!
//! `WorkflowWorker` consumes JetStream run tasks. It runs either as the
//! standalone `petstore-worker` binary or embedded in the API process.

pub mod processor;

pub use processor::{consumer_name, WorkerConfig, WorkflowWorker, CONSUMER_NAME_PREFIX};
