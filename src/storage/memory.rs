//! In-memory store

use crate::runtime::{
    error::LedgerError,
    ledger::{ExecutionLedger, Run},
};
use crate::triggers::types::{ScheduleTrigger, WebhookTrigger};
use crate::workflow::{
    storage::{StoreError, WorkflowMetadata, WorkflowStore},
    types::Workflow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    workflows: HashMap<String, (Workflow, WorkflowMetadata)>,
    webhooks: HashMap<String, WebhookTrigger>,
    schedules: HashMap<String, ScheduleTrigger>,
    runs: HashMap<Uuid, Run>,
}

/// Workflow store and execution ledger held in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        Ok(self.state.read().await.workflows.get(id).map(|(w, _)| w.clone()))
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let created_at = state
            .workflows
            .get(&workflow.id)
            .map(|(_, meta)| meta.created_at)
            .unwrap_or(now);
        let meta = WorkflowMetadata {
            id: workflow.id.clone(),
            name: workflow.name.clone(),
            created_at,
            updated_at: now,
        };
        state.workflows.insert(workflow.id.clone(), (workflow.clone(), meta));
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.state.write().await.workflows.remove(id).is_some())
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>, StoreError> {
        let state = self.state.read().await;
        let mut listed: Vec<WorkflowMetadata> = state.workflows.values().map(|(_, m)| m.clone()).collect();
        listed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(listed)
    }

    async fn list_active_webhooks(&self) -> Result<Vec<WebhookTrigger>, StoreError> {
        let state = self.state.read().await;
        Ok(state.webhooks.values().filter(|w| w.active).cloned().collect())
    }

    async fn active_webhook(&self, path: &str) -> Result<Option<WebhookTrigger>, StoreError> {
        let state = self.state.read().await;
        Ok(state.webhooks.get(path).filter(|w| w.active).cloned())
    }

    async fn list_active_schedules(&self) -> Result<Vec<ScheduleTrigger>, StoreError> {
        let state = self.state.read().await;
        Ok(state.schedules.values().filter(|s| s.active).cloned().collect())
    }

    async fn upsert_webhook(&self, trigger: &WebhookTrigger) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .webhooks
            .insert(trigger.path.clone(), trigger.clone());
        Ok(())
    }

    async fn deactivate_webhook(&self, path: &str) -> Result<(), StoreError> {
        if let Some(trigger) = self.state.write().await.webhooks.get_mut(path) {
            trigger.active = false;
        }
        Ok(())
    }

    async fn upsert_schedule(&self, trigger: &ScheduleTrigger) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .schedules
            .insert(trigger.workflow_id.clone(), trigger.clone());
        Ok(())
    }

    async fn deactivate_schedule(&self, workflow_id: &str) -> Result<(), StoreError> {
        if let Some(trigger) = self.state.write().await.schedules.get_mut(workflow_id) {
            trigger.active = false;
        }
        Ok(())
    }

    async fn record_schedule_fire(
        &self,
        workflow_id: &str,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(trigger) = self.state.write().await.schedules.get_mut(workflow_id) {
            trigger.last_run = Some(last_run);
            trigger.next_run = Some(next_run);
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionLedger for MemoryStore {
    async fn create_run(&self, run: &Run) -> Result<(), LedgerError> {
        self.state.write().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &Run) -> Result<(), LedgerError> {
        self.state.write().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, LedgerError> {
        Ok(self.state.read().await.runs.get(&id).cloned())
    }

    async fn list_runs(&self, workflow_id: &str, limit: usize) -> Result<Vec<Run>, LedgerError> {
        let state = self.state.read().await;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
