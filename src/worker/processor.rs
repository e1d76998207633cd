//! Worker processor - NATS JetStream consumer for workflow runs
//!
//! Pulls run tasks for one task queue, executes them with JetStream-backed
//! history and writes the outcome into the run record. A task is acked only
//! after its outcome is stored, so a crashed worker's runs are redelivered and
//! resume by replaying recorded activity outcomes.

use async_nats::jetstream::{self, consumer::PullConsumer, kv, stream::Stream, AckKind};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::durable::jetstream::{
    ensure_stream, open_bucket, task_subject, RunRecord, RunStatus, RUNS_BUCKET,
};
use crate::durable::{
    HistoryStore, JetStreamHistory, WorkflowContext, WorkflowRegistry, WorkflowTask,
};
use crate::types::{PetstoreError, Result};

pub const CONSUMER_NAME_PREFIX: &str = "pet_workflows";

/// Runs may retry activities for minutes before they settle
const ACK_WAIT: Duration = Duration::from_secs(600);

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker ID, used in logs
    pub worker_id: String,
    pub task_queue: String,
    /// Maximum runs in flight
    pub max_concurrent: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            task_queue: crate::workflows::DEFAULT_TASK_QUEUE.to_string(),
            max_concurrent: 10,
        }
    }
}

/// Durable consumer shared by every worker of a queue
pub fn consumer_name(task_queue: &str) -> String {
    let queue: String = task_queue
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}_{}", CONSUMER_NAME_PREFIX, queue)
}

/// Backend worker that executes workflow runs
pub struct WorkflowWorker {
    config: WorkerConfig,
    jetstream: jetstream::Context,
    runs: kv::Store,
    history: Arc<JetStreamHistory>,
    registry: WorkflowRegistry,
    running: Arc<RwLock<bool>>,
}

impl WorkflowWorker {
    pub async fn new(
        config: WorkerConfig,
        client: async_nats::Client,
        registry: WorkflowRegistry,
    ) -> Result<Self> {
        info!(
            "Starting workflow worker {} on queue {}",
            config.worker_id, config.task_queue
        );

        let jetstream = jetstream::new(client);
        let runs = open_bucket(&jetstream, RUNS_BUCKET).await?;
        let history = Arc::new(JetStreamHistory::open(&jetstream).await?);

        info!(
            "Worker {} serving workflows {:?}",
            config.worker_id,
            registry.names()
        );

        Ok(Self {
            config,
            jetstream,
            runs,
            history,
            registry,
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Run the worker processing loop
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;

        let stream = ensure_stream(&self.jetstream).await?;
        let consumer = self.ensure_consumer(&stream).await?;

        info!(
            "Worker {} starting run processing loop",
            self.config.worker_id
        );

        while *self.running.read().await {
            match self.process_batch(&consumer).await {
                Ok(count) => {
                    if count > 0 {
                        debug!("Processed {} workflow tasks", count);
                    }
                }
                Err(e) => {
                    error!("Error processing batch: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!("Worker {} stopped", self.config.worker_id);
        Ok(())
    }

    /// Stop the worker after the current batch
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    async fn ensure_consumer(&self, stream: &Stream) -> Result<PullConsumer> {
        let name = consumer_name(&self.config.task_queue);

        let consumer = stream
            .get_or_create_consumer(
                &name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: ACK_WAIT,
                    filter_subject: task_subject(&self.config.task_queue),
                    max_ack_pending: self.config.max_concurrent as i64,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| PetstoreError::Nats(format!("Failed to create consumer: {e}")))?;

        info!("Using consumer {}", name);
        Ok(consumer)
    }

    /// Fetch a batch and execute its runs concurrently
    async fn process_batch(&self, consumer: &PullConsumer) -> Result<usize> {
        let mut messages = consumer
            .fetch()
            .max_messages(self.config.max_concurrent)
            .expires(Duration::from_secs(5))
            .messages()
            .await
            .map_err(|e| PetstoreError::Nats(format!("Failed to fetch messages: {e}")))?;

        let mut batch = Vec::new();
        while let Some(msg_result) = messages.next().await {
            match msg_result {
                Ok(msg) => batch.push(msg),
                Err(e) => warn!("Error receiving message: {}", e),
            }
        }

        let count = batch.len();
        futures::future::join_all(batch.into_iter().map(|msg| self.process_message(msg))).await;
        Ok(count)
    }

    async fn process_message(&self, msg: jetstream::Message) {
        let task: WorkflowTask = match serde_json::from_slice(&msg.payload) {
            Ok(task) => task,
            Err(e) => {
                error!("Failed to parse workflow task: {}", e);
                if let Err(e) = msg.ack().await {
                    warn!("Failed to ack malformed message: {}", e);
                }
                return;
            }
        };

        match self.execute(&task).await {
            Ok(()) => {
                if let Err(e) = msg.ack().await {
                    warn!(workflow_id = %task.workflow_id, "Failed to ack task: {}", e);
                }
            }
            Err(e) => {
                error!(workflow_id = %task.workflow_id, "Workflow run did not settle, redelivering: {}", e);
                if let Err(e) = msg.ack_with(AckKind::Nak(Some(Duration::from_secs(5)))).await {
                    warn!(workflow_id = %task.workflow_id, "Failed to nak task: {}", e);
                }
            }
        }
    }

    /// Execute one run unless its record already holds an outcome
    async fn execute(&self, task: &WorkflowTask) -> Result<()> {
        let record = match self.load_record(&task.workflow_id).await? {
            Some(record) if record.status == RunStatus::Completed => {
                debug!(workflow_id = %task.workflow_id, "run already completed, skipping");
                return Ok(());
            }
            Some(record) => record,
            None => RunRecord::pending(&task.workflow_id, &task.workflow, &self.config.task_queue),
        };

        info!(workflow_id = %task.workflow_id, workflow = %task.workflow, worker_id = %self.config.worker_id, "executing workflow run");
        let completed = settle_run(&self.registry, self.history.clone(), task, record).await?;
        self.runs
            .put(&task.workflow_id, completed.to_bytes()?)
            .await
            .map_err(|e| PetstoreError::Nats(format!("Failed to store run outcome: {}", e)))?;
        Ok(())
    }

    async fn load_record(&self, workflow_id: &str) -> Result<Option<RunRecord>> {
        let bytes = self
            .runs
            .get(workflow_id)
            .await
            .map_err(|e| PetstoreError::Nats(format!("Failed to read run {}: {}", workflow_id, e)))?;
        bytes.map(|b| RunRecord::from_bytes(&b)).transpose()
    }
}

/// Execute a run and build its completed record.
///
/// A run that did not settle returns `Err` and yields no record, so the task
/// is redelivered instead of storing an engine failure as the outcome.
async fn settle_run(
    registry: &WorkflowRegistry,
    history: Arc<dyn HistoryStore>,
    task: &WorkflowTask,
    record: RunRecord,
) -> Result<RunRecord> {
    let ctx = WorkflowContext::new(task.workflow_id.clone(), history);
    let outcome = registry
        .execute(&task.workflow, ctx, task.input.clone())
        .await?;

    if let Some(failure) = &outcome.failure {
        warn!(workflow_id = %task.workflow_id, ?failure, partial = outcome.result.is_some(), "workflow run failed");
    } else {
        info!(workflow_id = %task.workflow_id, "workflow run completed");
    }
    Ok(record.complete(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::history::FailingAppends;
    use crate::durable::{ActivityOptions, Failure, RetryPolicy, Workflow, WorkflowOutcome};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Store;

    #[async_trait]
    impl Workflow for Store {
        fn name(&self) -> &'static str {
            "test.Store"
        }

        async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<WorkflowOutcome> {
            let options = ActivityOptions {
                start_to_close_timeout: Duration::from_secs(1),
                retry_policy: RetryPolicy {
                    maximum_attempts: 1,
                    ..Default::default()
                },
            };
            match ctx
                .execute_activity("test.Store", &options, input, |_, input| async move { Ok(input) })
                .await
            {
                Ok(value) => Ok(WorkflowOutcome::completed(value)),
                Err(e) if e.is_engine_failure() => Err(e),
                Err(e) => Ok(WorkflowOutcome::failed(Failure::from(&e))),
            }
        }
    }

    #[tokio::test]
    async fn unrecorded_history_leaves_the_run_pending() {
        let registry = WorkflowRegistry::builder().register(Arc::new(Store)).build();
        let history = Arc::new(FailingAppends::new(1));
        let task = WorkflowTask {
            workflow_id: "wf-9".into(),
            workflow: "test.Store".into(),
            input: serde_json::json!({"name": "Rex"}),
        };
        let pending = RunRecord::pending("wf-9", "test.Store", "TEST");

        let err = settle_run(&registry, history.clone(), &task, pending.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, PetstoreError::HistoryUnavailable(_)));

        let settled = settle_run(&registry, history, &task, pending).await.unwrap();
        assert_eq!(settled.status, RunStatus::Completed);
        assert_eq!(
            settled.outcome.and_then(|o| o.result),
            Some(serde_json::json!({"name": "Rex"}))
        );
    }

    #[test]
    fn consumer_names_are_shared_per_queue() {
        assert_eq!(consumer_name("PET_CREATION"), "pet_workflows_pet_creation");
        assert_eq!(consumer_name("pets.high"), "pet_workflows_pets_high");
    }
}
