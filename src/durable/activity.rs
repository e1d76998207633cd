//! Activity scheduling: replay, retries and heartbeats

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{ActivityOptions, Failure, HistoryEvent, HistoryStore};
use crate::types::{PetstoreError, Result};

/// Handle given to a workflow body for scheduling activities.
///
/// Activities are numbered in the order they are scheduled, so a workflow must
/// schedule the same activities in the same order on every execution.
#[derive(Clone)]
pub struct WorkflowContext {
    workflow_id: String,
    history: Arc<dyn HistoryStore>,
    next_seq: Arc<AtomicU64>,
}

impl WorkflowContext {
    pub fn new(workflow_id: impl Into<String>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            history,
            next_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Execute an activity, or replay its recorded outcome.
    ///
    /// Each attempt is bounded by `start_to_close_timeout`. Retryable failures
    /// are retried per the policy; the final outcome (success, terminal
    /// failure or exhaustion) is appended to the history.
    ///
    /// A history read or write that fails surfaces as
    /// `PetstoreError::HistoryUnavailable`, never as the activity's outcome.
    pub async fn execute_activity<I, O, F, Fut>(
        &self,
        name: &str,
        options: &ActivityOptions,
        input: I,
        activity: F,
    ) -> Result<O>
    where
        I: Clone + Send + Sync,
        O: Serialize + DeserializeOwned + Send,
        F: Fn(ActivityContext, I) -> Fut + Send + Sync,
        Fut: Future<Output = Result<O>> + Send,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        let recorded = self
            .history
            .load(&self.workflow_id, seq)
            .await
            .map_err(|e| PetstoreError::HistoryUnavailable(e.to_string()))?;
        if let Some(event) = recorded {
            if event.name() != name {
                return Err(PetstoreError::Workflow(format!(
                    "history mismatch in {} at {}: recorded {}, scheduled {}",
                    self.workflow_id,
                    seq,
                    event.name(),
                    name
                )));
            }
            debug!(workflow_id = %self.workflow_id, activity = name, seq, "replaying recorded activity outcome");
            return match event {
                HistoryEvent::ActivityCompleted { result, .. } => Ok(serde_json::from_value(result)?),
                HistoryEvent::ActivityFailed { failure, .. } => Err(failure.into()),
            };
        }

        let outcome = self.run_attempts(seq, name, options, input, &activity).await;

        let event = match &outcome {
            Ok(value) => HistoryEvent::ActivityCompleted {
                seq,
                name: name.to_string(),
                result: serde_json::to_value(value)?,
            },
            Err(err) => HistoryEvent::ActivityFailed {
                seq,
                name: name.to_string(),
                failure: Failure::from(err),
            },
        };
        if let Err(e) = self.history.append(&self.workflow_id, &event).await {
            error!(workflow_id = %self.workflow_id, activity = name, seq, error = %e, "activity outcome could not be recorded");
            return Err(PetstoreError::HistoryUnavailable(e.to_string()));
        }

        outcome
    }

    async fn run_attempts<I, O, F, Fut>(
        &self,
        seq: u64,
        name: &str,
        options: &ActivityOptions,
        input: I,
        activity: &F,
    ) -> Result<O>
    where
        I: Clone + Send + Sync,
        O: Send,
        F: Fn(ActivityContext, I) -> Fut + Send + Sync,
        Fut: Future<Output = Result<O>> + Send,
    {
        let policy = &options.retry_policy;
        let activity_key = format!("{}.{}", self.workflow_id, seq);
        let mut attempt: u32 = 1;

        loop {
            info!(workflow_id = %self.workflow_id, activity = name, attempt, "starting activity attempt");
            let ctx = ActivityContext {
                activity_key: activity_key.clone(),
                attempt,
                history: self.history.clone(),
            };

            let result = match tokio::time::timeout(
                options.start_to_close_timeout,
                activity(ctx, input.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(PetstoreError::Timeout(format!(
                    "activity {} attempt {} exceeded {:?}",
                    name, attempt, options.start_to_close_timeout
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    warn!(workflow_id = %self.workflow_id, activity = name, attempt, error = %e, "activity failed with non-retryable error");
                    return Err(e);
                }
                Err(e) if policy.attempts_exhausted(attempt) => {
                    error!(workflow_id = %self.workflow_id, activity = name, attempt, error = %e, "activity retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = policy.interval_for(attempt);
                    warn!(workflow_id = %self.workflow_id, activity = name, attempt, error = %e, ?delay, "activity attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Handle given to one activity attempt
pub struct ActivityContext {
    activity_key: String,
    attempt: u32,
    history: Arc<dyn HistoryStore>,
}

impl ActivityContext {
    /// Context outside a workflow run, keyed by `activity_key`
    pub fn new(activity_key: impl Into<String>, attempt: u32, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            activity_key: activity_key.into(),
            attempt,
            history,
        }
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn activity_key(&self) -> &str {
        &self.activity_key
    }

    /// Record progress visible to later attempts of the same invocation
    pub async fn record_heartbeat<T: Serialize>(&self, details: &T) -> Result<()> {
        self.history
            .record_heartbeat(&self.activity_key, serde_json::to_value(details)?)
            .await
    }

    /// Last recorded heartbeat details, if any
    pub async fn heartbeat_details<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.history.heartbeat(&self.activity_key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PetError;
    use crate::durable::history::FailingAppends;
    use crate::durable::{MemoryHistory, RetryPolicy};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn options(maximum_attempts: u32) -> ActivityOptions {
        ActivityOptions {
            start_to_close_timeout: Duration::from_millis(200),
            retry_policy: RetryPolicy {
                initial_interval: Duration::from_millis(1),
                backoff_coefficient: 2.0,
                maximum_interval: Duration::from_millis(5),
                maximum_attempts,
            },
        }
    }

    fn context(history: &Arc<MemoryHistory>) -> WorkflowContext {
        WorkflowContext::new("wf-1", history.clone())
    }

    #[tokio::test]
    async fn retries_until_success() {
        let history = Arc::new(MemoryHistory::new());
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<u32> = context(&history)
            .execute_activity("flaky", &options(5), (), |ctx, _| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if ctx.attempt() < 3 {
                        Err(PetstoreError::Partner("503".into()))
                    } else {
                        Ok(ctx.attempt())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_stops_immediately() {
        let history = Arc::new(MemoryHistory::new());
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<()> = context(&history)
            .execute_activity("validate", &options(5), (), |_, _| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PetstoreError::Validation(PetError::EmptyName))
                }
            })
            .await;

        assert!(matches!(result, Err(PetstoreError::Validation(PetError::EmptyName))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_and_exhaust() {
        let history = Arc::new(MemoryHistory::new());
        let mut opts = options(2);
        opts.start_to_close_timeout = Duration::from_millis(10);

        let result: Result<()> = context(&history)
            .execute_activity("slow", &opts, (), |_, _| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(PetstoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn recorded_outcomes_are_replayed() {
        let history = Arc::new(MemoryHistory::new());
        let calls = Arc::new(AtomicU32::new(0));
        let run = |ctx: WorkflowContext| {
            let calls = calls.clone();
            async move {
                let first: u32 = ctx
                    .execute_activity("one", &options(1), 10u32, |_, n| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(n + 1)
                        }
                    })
                    .await?;
                let second: u32 = ctx
                    .execute_activity("two", &options(1), first, |_, n| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Err::<u32, _>(PetstoreError::NotFound(n as i64))
                        }
                    })
                    .await?;
                Ok::<u32, PetstoreError>(second)
            }
        };

        assert!(matches!(run(context(&history)).await, Err(PetstoreError::NotFound(11))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(history.event_count("wf-1"), 2);

        // Re-execution replays both outcomes without calling the activities
        assert!(matches!(run(context(&history)).await, Err(PetstoreError::NotFound(11))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn heartbeats_survive_retries_of_one_invocation() {
        let history = Arc::new(MemoryHistory::new());
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let result: Result<()> = context(&history)
            .execute_activity("beat", &options(3), (), |ctx, _| {
                let seen = seen.clone();
                async move {
                    let previous: Option<u32> = ctx.heartbeat_details().await?;
                    seen.lock().await.push(previous);
                    ctx.record_heartbeat(&ctx.attempt()).await?;
                    if ctx.attempt() < 2 {
                        return Err(PetstoreError::Partner("retry me".into()));
                    }
                    Ok(())
                }
            })
            .await;

        result.unwrap();
        assert_eq!(*seen.lock().await, vec![None, Some(1)]);
    }

    #[tokio::test]
    async fn unrecorded_success_is_reported_as_history_unavailable() {
        let history = Arc::new(FailingAppends::new(1));
        let ctx = WorkflowContext::new("wf-2", history.clone());

        let result: Result<u32> = ctx
            .execute_activity("persist", &options(1), 4u32, |_, n| async move { Ok(n * 2) })
            .await;

        assert!(matches!(result, Err(PetstoreError::HistoryUnavailable(_))));
        assert_eq!(history.inner.event_count("wf-2"), 0);

        // A fresh execution re-runs the activity and records it
        let retried: u32 = WorkflowContext::new("wf-2", history.clone())
            .execute_activity("persist", &options(1), 4u32, |_, n| async move { Ok(n * 2) })
            .await
            .unwrap();
        assert_eq!(retried, 8);
        assert_eq!(history.inner.event_count("wf-2"), 1);
    }
}
