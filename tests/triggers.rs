use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use nodeflow::{
    config::ExecutionConfig,
    credentials::StaticCredentials,
    nodes::register_builtin,
    runtime::{
        error::HandlerError,
        events::ExecutionEvent,
        ledger::ExecutionLedger,
        registry::{NodeContext, NodeHandler, Output},
    },
    storage::{MemoryStore, SqliteStore},
    triggers::{ManualClock, ScheduleTrigger, WebhookRequest},
    workflow::storage::WorkflowStore,
    Edge, ExecutionCoordinator, HandlerRegistry, Node, RunMode, RunStatus, TriggerManager, Workflow,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;

fn stack<S>(store: Arc<S>, clock: Arc<ManualClock>) -> (TriggerManager, Arc<ExecutionCoordinator>)
where
    S: WorkflowStore + ExecutionLedger + 'static,
{
    let registry = Arc::new(HandlerRegistry::new());
    register_builtin(&registry);
    let coordinator = Arc::new(ExecutionCoordinator::new(
        store.clone(),
        store.clone(),
        registry,
        Arc::new(StaticCredentials::new()),
        &ExecutionConfig {
            ledger_write_attempts: 1,
            event_buffer: 64,
        },
    ));
    let manager = TriggerManager::new(store, coordinator.clone(), clock);
    (manager, coordinator)
}

fn at(h: u32, m: u32, s: u32, ms: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap() + chrono::Duration::milliseconds(ms.into())
}

fn scheduled_workflow(cron: &str) -> Workflow {
    Workflow::new("ticker", "Ticker")
        .with_node(Node::new("tick", "trigger.schedule").with_param("cron", json!(cron)))
        .with_node(Node::new("work", "core.noop"))
        .with_edge(Edge::new("tick", "work"))
}

async fn next_finished(events: &mut broadcast::Receiver<ExecutionEvent>) -> RunStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let ExecutionEvent::RunFinished { status, .. } = events.recv().await.unwrap() {
                return status;
            }
        }
    })
    .await
    .expect("no run finished in time")
}

/// Moves the manual clock forward while "working"
struct SlowWork(Arc<ManualClock>);

#[async_trait]
impl NodeHandler for SlowWork {
    async fn execute(&self, ctx: &NodeContext) -> Result<Vec<Output>, HandlerError> {
        self.0.advance(chrono::Duration::minutes(7));
        Ok(vec![Output::main(ctx.input.clone())])
    }
}

#[tokio::test]
async fn schedule_fires_at_slot_and_rearms_from_the_slot() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(at(10, 4, 59, 950)));
    let (manager, coordinator) = stack(store.clone(), clock.clone());
    coordinator
        .registry()
        .register("test.slow", Arc::new(SlowWork(clock.clone())));
    let mut events = coordinator.subscribe();

    let mut workflow = scheduled_workflow("*/5 * * * *");
    workflow.nodes[1].node_type = "test.slow".to_string();
    store.save_workflow(&workflow).await.unwrap();
    manager.refresh_triggers("ticker").await.unwrap();
    assert_eq!(
        manager.schedule_for("ticker").await.unwrap().next_run,
        Some(at(10, 5, 0, 0))
    );

    assert_eq!(next_finished(&mut events).await, RunStatus::Completed);

    // The run moved the clock to 10:11:59, yet the next slot derives from 10:05.
    let armed = manager.schedule_for("ticker").await.unwrap();
    assert_eq!(armed.last_run, Some(at(10, 5, 0, 0)));
    assert_eq!(armed.next_run, Some(at(10, 10, 0, 0)));
    let stored = store.list_active_schedules().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].last_run, Some(at(10, 5, 0, 0)));
    assert_eq!(stored[0].next_run, Some(at(10, 10, 0, 0)));

    let runs = store.list_runs("ticker", 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].mode, RunMode::Schedule);
    assert_eq!(runs[0].input["firedAt"], json!(at(10, 5, 0, 0).to_rfc3339()));

    manager.shutdown().await;
}

#[tokio::test]
async fn startup_fires_a_missed_schedule_once() {
    let store = Arc::new(MemoryStore::new());
    store.save_workflow(&scheduled_workflow("*/5 * * * *")).await.unwrap();
    store
        .upsert_schedule(&ScheduleTrigger {
            workflow_id: "ticker".into(),
            cron: "*/5 * * * *".into(),
            timezone: "UTC".into(),
            active: true,
            last_run: Some(at(8, 55, 0, 0)),
            next_run: Some(at(9, 0, 0, 0)),
        })
        .await
        .unwrap();

    let clock = Arc::new(ManualClock::new(at(10, 2, 0, 0)));
    let (manager, coordinator) = stack(store.clone(), clock);
    let mut events = coordinator.subscribe();
    manager.start().await.unwrap();

    assert_eq!(next_finished(&mut events).await, RunStatus::Completed);
    let armed = manager.schedule_for("ticker").await.unwrap();
    assert_eq!(armed.last_run, Some(at(10, 2, 0, 0)));
    assert_eq!(armed.next_run, Some(at(10, 5, 0, 0)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.list_runs("ticker", 10).await.unwrap().len(), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn removing_the_schedule_node_unregisters_the_schedule() {
    let store = Arc::new(MemoryStore::new());
    let (manager, _) = stack(store.clone(), Arc::new(ManualClock::new(at(10, 0, 0, 0))));

    store.save_workflow(&scheduled_workflow("0 * * * *")).await.unwrap();
    manager.refresh_triggers("ticker").await.unwrap();
    assert!(manager.schedule_for("ticker").await.is_some());

    let without = Workflow::new("ticker", "Ticker").with_node(Node::new("start", "trigger.manual"));
    store.save_workflow(&without).await.unwrap();
    manager.refresh_triggers("ticker").await.unwrap();

    assert!(manager.schedule_for("ticker").await.is_none());
    assert!(store.list_active_schedules().await.unwrap().is_empty());
}

#[tokio::test]
async fn sqlite_registrations_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("nodeflow.db").display());
    let clock = Arc::new(ManualClock::new(at(10, 0, 0, 0)));

    let workflow = Workflow::new("orders", "Orders")
        .with_node(
            Node::new("hook", "trigger.webhook")
                .with_param("path", json!("/orders"))
                .with_param("method", json!("POST")),
        )
        .with_node(Node::new("yearly", "trigger.schedule").with_param("cron", json!("0 0 1 1 *")))
        .with_node(Node::new("tag", "core.set").with_param("values", json!({"seen": true})))
        .with_edge(Edge::new("hook", "tag"));

    {
        let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
        let (manager, _) = stack(store.clone(), clock.clone());
        store.save_workflow(&workflow).await.unwrap();
        manager.refresh_triggers("orders").await.unwrap();
        manager.shutdown().await;
    }

    let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
    let (manager, _) = stack(store.clone(), clock);
    manager.start().await.unwrap();

    assert_eq!(manager.webhook_for("/orders").await.unwrap().workflow_id, "orders");
    assert_eq!(
        manager.schedule_for("orders").await.unwrap().next_run,
        Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    );

    let outcome = manager
        .execute_webhook(WebhookRequest {
            path: "orders".into(),
            method: "post".into(),
            body: json!({"id": 7}),
            ..WebhookRequest::default()
        })
        .await;
    assert!(outcome.triggered);
    let result = outcome.result.unwrap();
    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.output["tag"]["main"]["seen"], Value::Bool(true));
    assert_eq!(result.output["tag"]["main"]["body"]["id"], json!(7));

    let run = store.get_run(result.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.mode, RunMode::Webhook);
    manager.shutdown().await;
}
