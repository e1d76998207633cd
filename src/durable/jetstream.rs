//! NATS JetStream workflow engine
//!
//! - `PET_WORKFLOW_RUNS` (KV): one record per run id. Atomic `create` claims
//!   the identity; the worker overwrites the record with the outcome.
//! - `PET_WORKFLOW_HISTORY` (KV): activity history (`event.<run>.<seq>`) and
//!   heartbeats (`heartbeat.<run>.<seq>`).
//! - `PET_WORKFLOWS` (stream): run tasks on `pets.workflows.<task queue>`,
//!   de-duplicated by `Nats-Msg-Id`.

use async_nats::jetstream::{
    self,
    kv::{self, CreateErrorKind},
    stream::Stream,
};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    HistoryEvent, HistoryStore, RunHandle, StartWorkflowOptions, WorkflowEngine, WorkflowOutcome,
    WorkflowRun,
};
use crate::types::{PetstoreError, Result};

pub const RUNS_BUCKET: &str = "PET_WORKFLOW_RUNS";
pub const HISTORY_BUCKET: &str = "PET_WORKFLOW_HISTORY";
pub const STREAM_NAME: &str = "PET_WORKFLOWS";
pub const SUBJECT_PREFIX: &str = "pets.workflows";

/// Run records and history are kept for a week
const RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Subject carrying tasks for a queue
pub fn task_subject(task_queue: &str) -> String {
    format!("{}.{}", SUBJECT_PREFIX, task_queue)
}

/// Message published for each started run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowTask {
    pub workflow_id: String,
    pub workflow: String,
    pub input: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Completed,
}

/// Value stored under the run id in `PET_WORKFLOW_RUNS`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub workflow_id: String,
    pub workflow: String,
    pub task_queue: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<WorkflowOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn pending(workflow_id: &str, workflow: &str, task_queue: &str) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.to_string(),
            workflow: workflow.to_string(),
            task_queue: task_queue.to_string(),
            status: RunStatus::Pending,
            outcome: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn complete(mut self, outcome: WorkflowOutcome) -> Self {
        self.status = RunStatus::Completed;
        self.outcome = Some(outcome);
        self.updated_at = Utc::now();
        self
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(serde_json::to_vec(self)?.into())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Open a key-value bucket, creating it on first use
pub async fn open_bucket(js: &jetstream::Context, bucket: &str) -> Result<kv::Store> {
    if let Ok(store) = js.get_key_value(bucket).await {
        return Ok(store);
    }

    let store = js
        .create_key_value(kv::Config {
            bucket: bucket.to_string(),
            history: 1,
            max_age: RETENTION,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        })
        .await
        .map_err(|e| PetstoreError::Nats(format!("Failed to create bucket {}: {}", bucket, e)))?;

    info!("Created key-value bucket {}", bucket);
    Ok(store)
}

/// Ensure the workflow task stream exists
pub async fn ensure_stream(js: &jetstream::Context) -> Result<Stream> {
    let stream = js
        .get_or_create_stream(jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![format!("{}.>", SUBJECT_PREFIX)],
            max_age: RETENTION,
            storage: jetstream::stream::StorageType::File,
            duplicate_window: Duration::from_secs(600),
            ..Default::default()
        })
        .await
        .map_err(|e| PetstoreError::Nats(format!("Failed to create stream: {e}")))?;

    info!("Using stream {} with subjects {}.>", STREAM_NAME, SUBJECT_PREFIX);
    Ok(stream)
}

/// Activity history kept in `PET_WORKFLOW_HISTORY`
#[derive(Clone)]
pub struct JetStreamHistory {
    store: kv::Store,
}

impl JetStreamHistory {
    pub async fn open(js: &jetstream::Context) -> Result<Self> {
        Ok(Self {
            store: open_bucket(js, HISTORY_BUCKET).await?,
        })
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        self.store
            .get(key)
            .await
            .map_err(|e| PetstoreError::Nats(format!("Failed to read {}: {}", key, e)))
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<()> {
        self.store
            .put(key, value)
            .await
            .map(|_| ())
            .map_err(|e| PetstoreError::Nats(format!("Failed to write {}: {}", key, e)))
    }
}

#[async_trait]
impl HistoryStore for JetStreamHistory {
    async fn load(&self, workflow_id: &str, seq: u64) -> Result<Option<HistoryEvent>> {
        match self.read(&format!("event.{}.{}", workflow_id, seq)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn append(&self, workflow_id: &str, event: &HistoryEvent) -> Result<()> {
        let key = format!("event.{}.{}", workflow_id, event.seq());
        self.write(&key, serde_json::to_vec(event)?.into()).await
    }

    async fn heartbeat(&self, activity_key: &str) -> Result<Option<Value>> {
        match self.read(&format!("heartbeat.{}", activity_key)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn record_heartbeat(&self, activity_key: &str, details: Value) -> Result<()> {
        let key = format!("heartbeat.{}", activity_key);
        self.write(&key, serde_json::to_vec(&details)?.into()).await
    }
}

/// Client side of the JetStream engine: claims run ids, publishes tasks and
/// waits on run records. Execution happens in a `WorkflowWorker`.
pub struct JetStreamEngine {
    jetstream: jetstream::Context,
    runs: kv::Store,
    result_timeout: Duration,
}

impl JetStreamEngine {
    pub async fn new(client: async_nats::Client, result_timeout: Duration) -> Result<Self> {
        let jetstream = jetstream::new(client);
        ensure_stream(&jetstream).await?;
        let runs = open_bucket(&jetstream, RUNS_BUCKET).await?;
        // The history bucket is created here too so workers never race on it
        open_bucket(&jetstream, HISTORY_BUCKET).await?;

        Ok(Self {
            jetstream,
            runs,
            result_timeout,
        })
    }

    fn run_handle(&self, workflow_id: &str) -> WorkflowRun {
        WorkflowRun::new(
            workflow_id,
            Box::new(JetStreamRunHandle {
                runs: self.runs.clone(),
                workflow_id: workflow_id.to_string(),
                timeout: self.result_timeout,
            }),
        )
    }
}

#[async_trait]
impl WorkflowEngine for JetStreamEngine {
    async fn execute_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow: &str,
        input: Value,
    ) -> Result<WorkflowRun> {
        let task = WorkflowTask {
            workflow_id: options.id.clone(),
            workflow: workflow.to_string(),
            input,
        };
        let payload: Bytes = serde_json::to_vec(&task)?.into();
        let record = RunRecord::pending(&options.id, workflow, &options.task_queue);
        match self.runs.create(&options.id, record.to_bytes()?).await {
            Ok(_) => {}
            Err(e) if e.kind() == CreateErrorKind::AlreadyExists => {
                return Err(PetstoreError::WorkflowAlreadyStarted(options.id));
            }
            Err(e) => {
                return Err(PetstoreError::Nats(format!(
                    "Failed to claim run {}: {}",
                    options.id, e
                )))
            }
        }

        let mut headers = HeaderMap::new();
        headers.insert(async_nats::header::NATS_MESSAGE_ID, options.id.as_str());
        let publish = async {
            self.jetstream
                .publish_with_headers(task_subject(&options.task_queue), headers, payload)
                .await
                .map_err(|e| PetstoreError::Nats(format!("Publish failed: {}", e)))?
                .await
                .map_err(|e| PetstoreError::Nats(format!("Publish not acknowledged: {}", e)))?;
            Ok::<(), PetstoreError>(())
        };
        let release = async {
            self.runs.delete(&options.id).await.map_err(|e| {
                PetstoreError::Nats(format!("Failed to release run {}: {}", options.id, e))
            })
        };
        publish_or_release(&options.id, publish, release).await?;

        info!(workflow_id = %options.id, workflow, task_queue = %options.task_queue, "workflow run enqueued");
        Ok(self.run_handle(&options.id))
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowRun> {
        Ok(self.run_handle(workflow_id))
    }

    fn name(&self) -> &'static str {
        "jetstream"
    }
}

/// Publish the task of a claimed run, deleting the claim when the publish
/// fails so the same id can be started again.
async fn publish_or_release<P, R>(workflow_id: &str, publish: P, release: R) -> Result<()>
where
    P: Future<Output = Result<()>>,
    R: Future<Output = Result<()>>,
{
    let Err(e) = publish.await else {
        return Ok(());
    };
    warn!(workflow_id, error = %e, "run task not published, releasing its claim");
    if let Err(release_err) = release.await {
        error!(workflow_id, error = %release_err, "run claim not released, id stays reserved until the record expires");
    }
    Err(e)
}

/// Outcome carried by one update of a watched run record.
///
/// A deleted record means the start was abandoned before its task was
/// published.
fn watched_outcome(
    workflow_id: &str,
    operation: kv::Operation,
    value: &[u8],
) -> Result<Option<WorkflowOutcome>> {
    if operation != kv::Operation::Put {
        return Err(PetstoreError::Workflow(format!(
            "run {} was released before it started",
            workflow_id
        )));
    }
    let record = RunRecord::from_bytes(value)?;
    debug!(workflow_id, status = ?record.status, "run record update");
    Ok(match record.status {
        RunStatus::Completed => Some(record.outcome.unwrap_or_default()),
        RunStatus::Pending => None,
    })
}

struct JetStreamRunHandle {
    runs: kv::Store,
    workflow_id: String,
    timeout: Duration,
}

impl JetStreamRunHandle {
    async fn wait_completed(&self) -> Result<WorkflowOutcome> {
        let mut watch = self
            .runs
            .watch_with_history(&self.workflow_id)
            .await
            .map_err(|e| PetstoreError::Nats(format!("Failed to watch run: {}", e)))?;

        while let Some(entry) = watch.next().await {
            let entry =
                entry.map_err(|e| PetstoreError::Nats(format!("Run watch failed: {}", e)))?;
            if let Some(outcome) = watched_outcome(&self.workflow_id, entry.operation, &entry.value)? {
                return Ok(outcome);
            }
        }

        Err(PetstoreError::Nats(format!(
            "watch on run {} closed before completion",
            self.workflow_id
        )))
    }
}

#[async_trait]
impl RunHandle for JetStreamRunHandle {
    async fn outcome(&self) -> Result<WorkflowOutcome> {
        tokio::time::timeout(self.timeout, self.wait_completed())
            .await
            .map_err(|_| {
                PetstoreError::Timeout(format!(
                    "run {} did not complete within {:?}",
                    self.workflow_id, self.timeout
                ))
            })?
    }
}
