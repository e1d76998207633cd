//! Activity history and heartbeat storage

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Failure;
use crate::types::Result;

/// Recorded terminal outcome of one scheduled activity
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum HistoryEvent {
    ActivityCompleted { seq: u64, name: String, result: Value },
    ActivityFailed { seq: u64, name: String, failure: Failure },
}

impl HistoryEvent {
    pub fn seq(&self) -> u64 {
        match self {
            HistoryEvent::ActivityCompleted { seq, .. } | HistoryEvent::ActivityFailed { seq, .. } => *seq,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            HistoryEvent::ActivityCompleted { name, .. }
            | HistoryEvent::ActivityFailed { name, .. } => name,
        }
    }
}

/// Storage for workflow history and activity heartbeats.
///
/// History is keyed by workflow id and activity sequence number; heartbeats by
/// an activity key that stays stable across retries of one invocation.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn load(&self, workflow_id: &str, seq: u64) -> Result<Option<HistoryEvent>>;
    async fn append(&self, workflow_id: &str, event: &HistoryEvent) -> Result<()>;
    async fn heartbeat(&self, activity_key: &str) -> Result<Option<Value>>;
    async fn record_heartbeat(&self, activity_key: &str, details: Value) -> Result<()>;

    /// Drop everything recorded for a finished run. Stores that expire
    /// entries on their own leave this as a no-op.
    async fn forget(&self, _workflow_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Process-local history used by `LocalEngine` and tests
#[derive(Default)]
pub struct MemoryHistory {
    events: DashMap<(String, u64), HistoryEvent>,
    heartbeats: DashMap<String, Value>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded events for a run
    pub fn event_count(&self, workflow_id: &str) -> usize {
        self.events
            .iter()
            .filter(|entry| entry.key().0 == workflow_id)
            .count()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn load(&self, workflow_id: &str, seq: u64) -> Result<Option<HistoryEvent>> {
        Ok(self
            .events
            .get(&(workflow_id.to_string(), seq))
            .map(|entry| entry.value().clone()))
    }

    async fn append(&self, workflow_id: &str, event: &HistoryEvent) -> Result<()> {
        self.events
            .insert((workflow_id.to_string(), event.seq()), event.clone());
        Ok(())
    }

    async fn heartbeat(&self, activity_key: &str) -> Result<Option<Value>> {
        Ok(self
            .heartbeats
            .get(activity_key)
            .map(|entry| entry.value().clone()))
    }

    async fn record_heartbeat(&self, activity_key: &str, details: Value) -> Result<()> {
        self.heartbeats.insert(activity_key.to_string(), details);
        Ok(())
    }

    async fn forget(&self, workflow_id: &str) -> Result<()> {
        let prefix = format!("{}.", workflow_id);
        self.events.retain(|key, _| key.0 != workflow_id);
        self.heartbeats.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}

/// Memory history whose first `n` appends fail like a timed-out KV put
#[cfg(test)]
pub(crate) struct FailingAppends {
    pub inner: MemoryHistory,
    remaining: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl FailingAppends {
    pub fn new(n: u32) -> Self {
        Self {
            inner: MemoryHistory::new(),
            remaining: std::sync::atomic::AtomicU32::new(n),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl HistoryStore for FailingAppends {
    async fn load(&self, workflow_id: &str, seq: u64) -> Result<Option<HistoryEvent>> {
        self.inner.load(workflow_id, seq).await
    }

    async fn append(&self, workflow_id: &str, event: &HistoryEvent) -> Result<()> {
        use std::sync::atomic::Ordering;
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(crate::types::PetstoreError::Nats("kv put timed out".into()));
        }
        self.inner.append(workflow_id, event).await
    }

    async fn heartbeat(&self, activity_key: &str) -> Result<Option<Value>> {
        self.inner.heartbeat(activity_key).await
    }

    async fn record_heartbeat(&self, activity_key: &str, details: Value) -> Result<()> {
        self.inner.record_heartbeat(activity_key, details).await
    }

    async fn forget(&self, workflow_id: &str) -> Result<()> {
        self.inner.forget(workflow_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(seq: u64) -> HistoryEvent {
        HistoryEvent::ActivityCompleted {
            seq,
            name: "step".into(),
            result: Value::Null,
        }
    }

    #[tokio::test]
    async fn forget_drops_only_the_named_run() {
        let history = MemoryHistory::new();
        history.append("wf-1", &completed(1)).await.unwrap();
        history.append("wf-1", &completed(2)).await.unwrap();
        history.append("wf-10", &completed(1)).await.unwrap();
        history.record_heartbeat("wf-1.2", Value::from(3)).await.unwrap();
        history.record_heartbeat("wf-10.1", Value::from(4)).await.unwrap();

        history.forget("wf-1").await.unwrap();

        assert_eq!(history.event_count("wf-1"), 0);
        assert_eq!(history.event_count("wf-10"), 1);
        assert!(history.heartbeat("wf-1.2").await.unwrap().is_none());
        assert_eq!(history.heartbeat("wf-10.1").await.unwrap(), Some(Value::from(4)));
    }
}
