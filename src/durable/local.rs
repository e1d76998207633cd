//! In-process workflow engine

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    HistoryStore, MemoryHistory, RunHandle, StartWorkflowOptions, WorkflowContext, WorkflowEngine,
    WorkflowOutcome, WorkflowRegistry, WorkflowRun,
};
use crate::types::{PetstoreError, Result};

/// How long a finished run's id and history are kept
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// `Err` carries the reason a run ended without settling
type Settled = Option<std::result::Result<WorkflowOutcome, String>>;
type OutcomeReceiver = watch::Receiver<Settled>;

struct RunSlot {
    generation: u64,
    outcome: OutcomeReceiver,
}

/// Runs workflows on spawned tasks with in-memory history.
///
/// A run id is reserved from start until `retention` after the run settles,
/// so a second start with the same id within that window is rejected. A run
/// that ends without settling releases its id immediately.
pub struct LocalEngine {
    registry: WorkflowRegistry,
    history: Arc<dyn HistoryStore>,
    runs: Arc<DashMap<String, RunSlot>>,
    generation: AtomicU64,
    retention: Duration,
}

impl LocalEngine {
    pub fn new(registry: WorkflowRegistry) -> Self {
        Self::with_history(registry, Arc::new(MemoryHistory::new()))
    }

    pub fn with_history(registry: WorkflowRegistry, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            registry,
            history,
            runs: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Runs currently holding their id
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

fn release(runs: &DashMap<String, RunSlot>, workflow_id: &str, generation: u64) {
    runs.remove_if(workflow_id, |_, slot| slot.generation == generation);
}

struct LocalRunHandle {
    workflow_id: String,
    outcome: OutcomeReceiver,
}

#[async_trait]
impl RunHandle for LocalRunHandle {
    async fn outcome(&self) -> Result<WorkflowOutcome> {
        let mut receiver = self.outcome.clone();
        let settled = receiver.wait_for(Option::is_some).await.map_err(|_| {
            PetstoreError::Workflow(format!("run {} ended without an outcome", self.workflow_id))
        })?;
        match settled.clone() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(reason)) => Err(PetstoreError::Workflow(format!(
                "run {} did not settle: {}",
                self.workflow_id, reason
            ))),
            None => Ok(WorkflowOutcome::default()),
        }
    }
}

#[async_trait]
impl WorkflowEngine for LocalEngine {
    async fn execute_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow: &str,
        input: Value,
    ) -> Result<WorkflowRun> {
        let (sender, receiver) = watch::channel(None);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        match self.runs.entry(options.id.clone()) {
            Entry::Occupied(_) => return Err(PetstoreError::WorkflowAlreadyStarted(options.id)),
            Entry::Vacant(slot) => {
                slot.insert(RunSlot {
                    generation,
                    outcome: receiver.clone(),
                });
            }
        }

        info!(workflow_id = %options.id, workflow, task_queue = %options.task_queue, "starting local workflow run");

        let registry = self.registry.clone();
        let history = self.history.clone();
        let runs = self.runs.clone();
        let retention = self.retention;
        let ctx = WorkflowContext::new(options.id.clone(), self.history.clone());
        let name = workflow.to_string();
        let workflow_id = options.id.clone();
        tokio::spawn(async move {
            match registry.execute(&name, ctx, input).await {
                Ok(outcome) => {
                    debug!(workflow_id = %workflow_id, failed = outcome.failure.is_some(), "local workflow run finished");
                    let _ = sender.send(Some(Ok(outcome)));
                    drop(sender);

                    tokio::time::sleep(retention).await;
                    release(&runs, &workflow_id, generation);
                    if let Err(e) = history.forget(&workflow_id).await {
                        warn!(workflow_id = %workflow_id, error = %e, "failed to drop local run history");
                    }
                    debug!(workflow_id = %workflow_id, "local workflow run evicted");
                }
                Err(e) => {
                    warn!(workflow_id = %workflow_id, error = %e, "local workflow run did not settle, releasing its id");
                    release(&runs, &workflow_id, generation);
                    let _ = sender.send(Some(Err(e.to_string())));
                }
            }
        });

        Ok(WorkflowRun::new(
            options.id.clone(),
            Box::new(LocalRunHandle {
                workflow_id: options.id,
                outcome: receiver,
            }),
        ))
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowRun> {
        let receiver = self
            .runs
            .get(workflow_id)
            .map(|entry| entry.value().outcome.clone())
            .ok_or_else(|| PetstoreError::Workflow(format!("unknown workflow run {}", workflow_id)))?;

        Ok(WorkflowRun::new(
            workflow_id,
            Box::new(LocalRunHandle {
                workflow_id: workflow_id.to_string(),
                outcome: receiver,
            }),
        ))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::history::FailingAppends;
    use crate::durable::{ActivityOptions, Failure, RetryPolicy, Workflow};
    use std::sync::atomic::AtomicU32;

    struct Echo {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Workflow for Echo {
        fn name(&self) -> &'static str {
            "test.Echo"
        }

        async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<WorkflowOutcome> {
            let options = ActivityOptions {
                start_to_close_timeout: Duration::from_secs(1),
                retry_policy: RetryPolicy {
                    maximum_attempts: 1,
                    ..Default::default()
                },
            };
            let calls = self.calls.clone();
            let result: Result<Value> = ctx
                .execute_activity("test.Echo", &options, input, |_, input| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(input)
                    }
                })
                .await;
            match result {
                Ok(value) => Ok(WorkflowOutcome::completed(value)),
                Err(e) if e.is_engine_failure() => Err(e),
                Err(e) => Ok(WorkflowOutcome::failed(Failure::from(&e))),
            }
        }
    }

    fn registry(calls: &Arc<AtomicU32>) -> WorkflowRegistry {
        WorkflowRegistry::builder()
            .register(Arc::new(Echo {
                calls: calls.clone(),
            }))
            .build()
    }

    fn engine(calls: &Arc<AtomicU32>) -> LocalEngine {
        LocalEngine::new(registry(calls))
    }

    fn start(id: &str) -> StartWorkflowOptions {
        StartWorkflowOptions {
            id: id.to_string(),
            task_queue: "TEST".to_string(),
        }
    }

    #[tokio::test]
    async fn runs_workflow_and_returns_outcome() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(&calls);

        let run = engine
            .execute_workflow(start("wf-a"), "test.Echo", serde_json::json!({"n": 1}))
            .await
            .unwrap();

        assert_eq!(run.id(), "wf-a");
        let outcome = run.get().await.unwrap();
        assert_eq!(outcome.result, Some(serde_json::json!({"n": 1})));
        assert!(outcome.failure.is_none());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected_and_share_the_first_outcome() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(&calls);

        engine
            .execute_workflow(start("wf-b"), "test.Echo", serde_json::json!("first"))
            .await
            .unwrap();
        let err = engine
            .execute_workflow(start("wf-b"), "test.Echo", serde_json::json!("second"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PetstoreError::WorkflowAlreadyStarted(ref id) if id == "wf-b"));

        let outcome = engine.get_workflow("wf-b").await.unwrap().get().await.unwrap();
        assert_eq!(outcome.result, Some(serde_json::json!("first")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_workflow_fails_the_run() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(&calls);

        let outcome = engine
            .execute_workflow(start("wf-c"), "test.Missing", Value::Null)
            .await
            .unwrap()
            .get()
            .await
            .unwrap();
        assert!(matches!(outcome.failure, Some(Failure::Internal { .. })));
        assert!(engine.get_workflow("wf-unknown").await.is_err());
    }

    #[tokio::test]
    async fn unsettled_run_fails_and_frees_its_id() {
        let calls = Arc::new(AtomicU32::new(0));
        let history = Arc::new(FailingAppends::new(1));
        let engine = LocalEngine::with_history(registry(&calls), history.clone());

        let err = engine
            .execute_workflow(start("wf-d"), "test.Echo", serde_json::json!("x"))
            .await
            .unwrap()
            .get()
            .await
            .unwrap_err();
        assert!(matches!(err, PetstoreError::Workflow(ref m) if m.contains("did not settle")));
        assert_eq!(engine.run_count(), 0);

        let outcome = engine
            .execute_workflow(start("wf-d"), "test.Echo", serde_json::json!("x"))
            .await
            .unwrap()
            .get()
            .await
            .unwrap();
        assert_eq!(outcome.result, Some(serde_json::json!("x")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(history.inner.event_count("wf-d"), 1);
    }

    #[tokio::test]
    async fn settled_runs_are_evicted_after_retention() {
        let calls = Arc::new(AtomicU32::new(0));
        let history = Arc::new(MemoryHistory::new());
        let engine = LocalEngine::with_history(registry(&calls), history.clone())
            .with_retention(Duration::from_millis(10));

        engine
            .execute_workflow(start("wf-e"), "test.Echo", serde_json::json!(1))
            .await
            .unwrap()
            .get()
            .await
            .unwrap();
        assert_eq!(history.event_count("wf-e"), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(engine.run_count(), 0);
        assert_eq!(history.event_count("wf-e"), 0);
        assert!(engine.get_workflow("wf-e").await.is_err());

        let again = engine
            .execute_workflow(start("wf-e"), "test.Echo", serde_json::json!(2))
            .await
            .unwrap()
            .get()
            .await
            .unwrap();
        assert_eq!(again.result, Some(serde_json::json!(2)));
    }
}
