/// SQLite persistence layer
///
/// Handles workflow documents, trigger registrations and run records in one
/// SQLite database. Workflows and runs are stored as JSON documents next to
/// a few indexed lookup columns; timestamps are RFC 3339 UTC strings so they
/// sort lexicographically.

use crate::runtime::{
    error::LedgerError,
    ledger::{ExecutionLedger, Run},
};
use crate::triggers::types::{ScheduleTrigger, WebhookAuth, WebhookTrigger};
use crate::workflow::{
    storage::{StoreError, WorkflowMetadata, WorkflowStore},
    types::Workflow,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use std::str::FromStr;
use uuid::Uuid;

/// SQLite-backed workflow store and execution ledger
#[derive(Debug, Clone)]
pub struct SqliteStore {
    /// SQLite connection pool
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url`, creating the database file if needed, and initialize the schema
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Every connection to ":memory:" opens its own empty database, so keep
        // exactly one alive for the lifetime of the pool.
        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        tracing::info!("🗄️ SQLite store ready at {}", url);
        Ok(store)
    }

    /// Create new storage instance with an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS webhook_triggers (
                path TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                method TEXT NOT NULL,
                auth TEXT NOT NULL,
                active INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS schedule_triggers (
                workflow_id TEXT PRIMARY KEY,
                cron TEXT NOT NULL,
                timezone TEXT NOT NULL,
                active INTEGER NOT NULL,
                last_run TEXT,
                next_run TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                document TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs(workflow_id, started_at)",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn write_run(&self, run: &Run) -> Result<(), LedgerError> {
        let document = serde_json::to_string(run)?;
        sqlx::query(
            r#"
            INSERT INTO runs (id, workflow_id, status, started_at, document)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                document = excluded.document
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.workflow_id)
        .bind(run.status.as_str())
        .bind(timestamp(run.started_at))
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid timestamp '{}': {}", raw, e)))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn webhook_from_row(row: &SqliteRow) -> Result<WebhookTrigger, StoreError> {
    let auth: String = row.try_get("auth")?;
    Ok(WebhookTrigger {
        workflow_id: row.try_get("workflow_id")?,
        path: row.try_get("path")?,
        method: row.try_get("method")?,
        auth: serde_json::from_str::<WebhookAuth>(&auth)?,
        active: row.try_get("active")?,
    })
}

fn schedule_from_row(row: &SqliteRow) -> Result<ScheduleTrigger, StoreError> {
    Ok(ScheduleTrigger {
        workflow_id: row.try_get("workflow_id")?,
        cron: row.try_get("cron")?,
        timezone: row.try_get("timezone")?,
        active: row.try_get("active")?,
        last_run: parse_optional_timestamp(row.try_get("last_run")?)?,
        next_run: parse_optional_timestamp(row.try_get("next_run")?)?,
    })
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition: String = row.try_get("definition")?;
                Ok(Some(serde_json::from_str(&definition)?))
            }
            None => Ok(None),
        }
    }

    /// Uses UPSERT to handle both create and update atomically.
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let definition = serde_json::to_string(workflow)?;
        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&definition)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM workflows ORDER BY updated_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<WorkflowMetadata, StoreError> {
                Ok(WorkflowMetadata {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
                    updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
                })
            })
            .collect()
    }

    async fn list_active_webhooks(&self) -> Result<Vec<WebhookTrigger>, StoreError> {
        let rows = sqlx::query("SELECT * FROM webhook_triggers WHERE active = 1 ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(webhook_from_row).collect()
    }

    async fn active_webhook(&self, path: &str) -> Result<Option<WebhookTrigger>, StoreError> {
        let row = sqlx::query("SELECT * FROM webhook_triggers WHERE path = ? AND active = 1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(webhook_from_row).transpose()
    }

    async fn list_active_schedules(&self) -> Result<Vec<ScheduleTrigger>, StoreError> {
        let rows = sqlx::query("SELECT * FROM schedule_triggers WHERE active = 1 ORDER BY workflow_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn upsert_webhook(&self, trigger: &WebhookTrigger) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_triggers (path, workflow_id, method, auth, active)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                workflow_id = excluded.workflow_id,
                method = excluded.method,
                auth = excluded.auth,
                active = excluded.active
            "#,
        )
        .bind(&trigger.path)
        .bind(&trigger.workflow_id)
        .bind(&trigger.method)
        .bind(serde_json::to_string(&trigger.auth)?)
        .bind(trigger.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate_webhook(&self, path: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE webhook_triggers SET active = 0 WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_schedule(&self, trigger: &ScheduleTrigger) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO schedule_triggers (workflow_id, cron, timezone, active, last_run, next_run)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(workflow_id) DO UPDATE SET
                cron = excluded.cron,
                timezone = excluded.timezone,
                active = excluded.active,
                last_run = excluded.last_run,
                next_run = excluded.next_run
            "#,
        )
        .bind(&trigger.workflow_id)
        .bind(&trigger.cron)
        .bind(&trigger.timezone)
        .bind(trigger.active)
        .bind(trigger.last_run.map(timestamp))
        .bind(trigger.next_run.map(timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate_schedule(&self, workflow_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE schedule_triggers SET active = 0 WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_schedule_fire(
        &self,
        workflow_id: &str,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE schedule_triggers SET last_run = ?, next_run = ? WHERE workflow_id = ?")
            .bind(timestamp(last_run))
            .bind(timestamp(next_run))
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionLedger for SqliteStore {
    async fn create_run(&self, run: &Run) -> Result<(), LedgerError> {
        self.write_run(run).await
    }

    async fn update_run(&self, run: &Run) -> Result<(), LedgerError> {
        self.write_run(run).await
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, LedgerError> {
        let row = sqlx::query("SELECT document FROM runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let document: String = row.try_get("document")?;
                Ok(Some(serde_json::from_str(&document)?))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(&self, workflow_id: &str, limit: usize) -> Result<Vec<Run>, LedgerError> {
        let rows = sqlx::query(
            "SELECT document FROM runs WHERE workflow_id = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(workflow_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Run, LedgerError> {
                let document: String = row.try_get("document")?;
                Ok(serde_json::from_str(&document)?)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ledger::{RunMode, RunStatus};
    use chrono::TimeZone;
    use serde_json::json;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn workflows_round_trip_through_json_documents() {
        let store = store().await;
        let workflow = Workflow::new("wf", "Orders");
        store.save_workflow(&workflow).await.unwrap();

        assert_eq!(store.get_workflow("wf").await.unwrap(), Some(workflow));
        assert_eq!(store.list_workflows().await.unwrap()[0].name, "Orders");
        assert!(store.delete_workflow("wf").await.unwrap());
        assert_eq!(store.get_workflow("wf").await.unwrap(), None);
    }

    #[tokio::test]
    async fn active_webhook_ignores_deactivated_rows() {
        let store = store().await;
        store
            .upsert_webhook(&WebhookTrigger {
                workflow_id: "wf".into(),
                path: "/orders".into(),
                method: "POST".into(),
                auth: WebhookAuth::None,
                active: true,
            })
            .await
            .unwrap();
        assert_eq!(store.active_webhook("/orders").await.unwrap().unwrap().workflow_id, "wf");
        assert!(store.active_webhook("/other").await.unwrap().is_none());

        store.deactivate_webhook("/orders").await.unwrap();
        assert!(store.active_webhook("/orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn schedule_fire_updates_run_times() {
        let store = store().await;
        let next = Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap();
        store
            .upsert_schedule(&ScheduleTrigger {
                workflow_id: "wf".into(),
                cron: "*/5 * * * *".into(),
                timezone: "UTC".into(),
                active: true,
                last_run: None,
                next_run: Some(next),
            })
            .await
            .unwrap();

        let after = Utc.with_ymd_and_hms(2024, 3, 1, 10, 10, 0).unwrap();
        store.record_schedule_fire("wf", next, after).await.unwrap();
        let schedules = store.list_active_schedules().await.unwrap();
        assert_eq!(schedules[0].last_run, Some(next));
        assert_eq!(schedules[0].next_run, Some(after));

        store.deactivate_schedule("wf").await.unwrap();
        assert!(store.list_active_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn runs_are_listed_newest_first() {
        let store = store().await;
        let ids = vec!["a".to_string()];
        let mut first = Run::new("wf", RunMode::Manual, json!({}), ids.iter());
        first.started_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut second = Run::new("wf", RunMode::Schedule, json!({}), ids.iter());
        second.started_at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        store.create_run(&first).await.unwrap();
        store.create_run(&second).await.unwrap();

        second.finalize(RunStatus::Completed, json!({}), None, None);
        store.update_run(&second).await.unwrap();

        let runs = store.list_runs("wf", 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(store.list_runs("wf", 1).await.unwrap().len(), 1);
        assert_eq!(store.get_run(first.id).await.unwrap(), Some(first));
    }
}
