/// Workflow store contract
///
/// The coordinator and trigger manager reach persisted graphs and trigger
/// registrations only through [`WorkflowStore`]. Workflows are stored as
/// whole JSON documents; trigger registrations are stored as rows keyed by
/// webhook path and by workflow id. Backends live in `crate::storage`.

use crate::triggers::types::{ScheduleTrigger, WebhookTrigger};
use crate::workflow::types::Workflow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Basic workflow metadata for listing operations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError>;

    /// Create or replace a workflow document
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Returns `false` if no such workflow existed
    async fn delete_workflow(&self, id: &str) -> Result<bool, StoreError>;

    /// All workflows, most recently updated first
    async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>, StoreError>;

    async fn list_active_webhooks(&self) -> Result<Vec<WebhookTrigger>, StoreError>;

    /// The active registration at `path`, if any
    async fn active_webhook(&self, path: &str) -> Result<Option<WebhookTrigger>, StoreError>;

    async fn list_active_schedules(&self) -> Result<Vec<ScheduleTrigger>, StoreError>;

    /// Insert or replace the registration for `trigger.path`
    async fn upsert_webhook(&self, trigger: &WebhookTrigger) -> Result<(), StoreError>;

    /// Mark the webhook at `path` inactive; no-op if unknown
    async fn deactivate_webhook(&self, path: &str) -> Result<(), StoreError>;

    /// Insert or replace the schedule of `trigger.workflow_id`
    async fn upsert_schedule(&self, trigger: &ScheduleTrigger) -> Result<(), StoreError>;

    /// Mark the workflow's schedule inactive; no-op if unknown
    async fn deactivate_schedule(&self, workflow_id: &str) -> Result<(), StoreError>;

    /// Record a schedule fire: `last_run` and the rescheduled `next_run`
    async fn record_schedule_fire(
        &self,
        workflow_id: &str,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
