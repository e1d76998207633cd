//! Workflow registration by name

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use super::{Failure, WorkflowContext, WorkflowOutcome};
use crate::types::Result;

/// A named, deterministic workflow body
#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drive the run to completion. Side effects belong in activities
    /// scheduled through `ctx` so they are replayed on re-execution.
    ///
    /// `Err` means the run did not settle (its history could not be read or
    /// written) and must be executed again; it is never stored as an outcome.
    async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<WorkflowOutcome>;
}

/// Workflows a worker or engine can execute
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    workflows: Arc<HashMap<String, Arc<dyn Workflow>>>,
}

impl WorkflowRegistry {
    pub fn builder() -> WorkflowRegistryBuilder {
        WorkflowRegistryBuilder {
            map: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the named workflow; an unknown name yields a failed outcome
    pub async fn execute(
        &self,
        name: &str,
        ctx: WorkflowContext,
        input: Value,
    ) -> Result<WorkflowOutcome> {
        match self.get(name) {
            Some(workflow) => workflow.run(ctx, input).await,
            None => {
                error!(workflow = name, "no workflow registered under this name");
                Ok(WorkflowOutcome::failed(Failure::internal(format!(
                    "workflow {} is not registered",
                    name
                ))))
            }
        }
    }
}

pub struct WorkflowRegistryBuilder {
    map: HashMap<String, Arc<dyn Workflow>>,
}

impl WorkflowRegistryBuilder {
    pub fn register(mut self, workflow: Arc<dyn Workflow>) -> Self {
        self.map.insert(workflow.name().to_string(), workflow);
        self
    }

    pub fn build(self) -> WorkflowRegistry {
        WorkflowRegistry {
            workflows: Arc::new(self.map),
        }
    }
}
