/// Trigger manager
///
/// Owns the lifecycle of webhook and cron triggers:
/// - Webhook index (`path -> registration`) used by the HTTP ingress
/// - One armed single-shot timer per active schedule, re-armed on every fire
///   relative to the fire time so run duration never causes drift
/// - Startup recovery from the store, including catch-up of missed fires
/// - Refresh from a workflow's trigger nodes after every graph write
///
/// Every mutation is serialized by one async mutex. The mutex is never held
/// while a workflow runs.

use crate::{
    runtime::{
        executor::{ExecutionCoordinator, RunResult},
        ledger::RunMode,
    },
    triggers::{
        schedule::{Clock, CronSchedule},
        types::{normalize_path, ScheduleTrigger, TriggerError, WebhookAuth, WebhookTrigger, ANY_METHOD},
    },
    workflow::{storage::WorkflowStore, types::Workflow},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Mutex, task::JoinHandle};
use uuid::Uuid;

/// Node type whose parameters declare a webhook
pub const WEBHOOK_NODE: &str = "trigger.webhook";
/// Node type whose parameters declare a schedule
pub const SCHEDULE_NODE: &str = "trigger.schedule";

/// Inbound webhook call as forwarded by the HTTP layer
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub path: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Value,
}

/// Why a known webhook refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookRejection {
    MethodNotAllowed,
    Unauthorized,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WebhookOutcome {
    pub triggered: bool,
    pub workflow_id: Option<String>,
    pub run_id: Option<Uuid>,
    pub error: Option<String>,
    pub rejection: Option<WebhookRejection>,
    pub result: Option<RunResult>,
}

impl WebhookOutcome {
    fn rejected(workflow_id: &str, rejection: WebhookRejection, error: String) -> Self {
        Self {
            workflow_id: Some(workflow_id.to_string()),
            error: Some(error),
            rejection: Some(rejection),
            ..Self::default()
        }
    }
}

/// Registrations derived from a workflow's trigger nodes
#[derive(Debug, Default)]
struct DerivedTriggers {
    webhooks: Vec<WebhookTrigger>,
    schedule: Option<(ScheduleTrigger, CronSchedule)>,
}

struct ArmedSchedule {
    trigger: ScheduleTrigger,
    schedule: CronSchedule,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl ArmedSchedule {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct TriggerState {
    webhooks: HashMap<String, WebhookTrigger>,
    schedules: HashMap<String, ArmedSchedule>,
}

#[derive(Clone)]
pub struct TriggerManager {
    store: Arc<dyn WorkflowStore>,
    coordinator: Arc<ExecutionCoordinator>,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<TriggerState>>,
    generations: Arc<AtomicU64>,
}

impl TriggerManager {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        coordinator: Arc<ExecutionCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            coordinator,
            clock,
            state: Arc::new(Mutex::new(TriggerState::default())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Load active triggers from the store, re-index webhooks and re-arm schedules
    ///
    /// A schedule whose stored next run already passed fires once right away.
    pub async fn start(&self) -> Result<(), TriggerError> {
        tracing::info!("⏰ Starting trigger manager");
        let webhooks = self.store.list_active_webhooks().await?;
        let schedules = self.store.list_active_schedules().await?;

        let mut state = self.state.lock().await;
        for webhook in webhooks {
            tracing::debug!("🔗 Restored webhook {} {} -> {}", webhook.method, webhook.path, webhook.workflow_id);
            state.webhooks.insert(webhook.path.clone(), webhook);
        }

        let now = self.clock.now();
        let mut caught_up = 0;
        for mut trigger in schedules {
            let schedule = match CronSchedule::parse(&trigger.cron, &trigger.timezone) {
                Ok(schedule) => schedule,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping stored schedule of workflow '{}': {}", trigger.workflow_id, e);
                    continue;
                }
            };
            let next_run = match trigger.next_run {
                Some(next_run) => next_run,
                None => match schedule.next_after(now) {
                    Some(next_run) => next_run,
                    None => continue,
                },
            };
            if next_run <= now {
                caught_up += 1;
                tracing::info!(
                    "⏩ Schedule of workflow '{}' missed {}, firing now",
                    trigger.workflow_id,
                    next_run
                );
            }
            trigger.next_run = Some(next_run);
            self.arm(&mut state, trigger, schedule);
        }

        tracing::info!(
            "✅ Trigger manager started: {} webhooks, {} schedules ({} catching up)",
            state.webhooks.len(),
            state.schedules.len(),
            caught_up
        );
        Ok(())
    }

    /// Disarm every timer and drop the in-memory index; the store is untouched
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        for armed in state.schedules.values_mut() {
            armed.disarm();
        }
        state.schedules.clear();
        state.webhooks.clear();
        tracing::info!("⏹️ Trigger manager stopped");
    }

    /// Register (or re-register) a webhook for `workflow_id`
    pub async fn register_webhook(
        &self,
        workflow_id: &str,
        path: &str,
        method: &str,
        auth: WebhookAuth,
    ) -> Result<WebhookTrigger, TriggerError> {
        let trigger = webhook_trigger(workflow_id, path, method, auth)?;
        let mut state = self.state.lock().await;
        self.check_webhook_conflict(&state, &trigger).await?;
        self.store.upsert_webhook(&trigger).await?;
        state.webhooks.insert(trigger.path.clone(), trigger.clone());
        tracing::info!("🔗 Registered webhook {} {} -> {}", trigger.method, trigger.path, workflow_id);
        Ok(trigger)
    }

    /// Deactivate the webhook at `path`; unknown paths are a no-op
    pub async fn unregister_webhook(&self, path: &str) -> Result<(), TriggerError> {
        let path = normalize_path(path)?;
        let mut state = self.state.lock().await;
        self.store.deactivate_webhook(&path).await?;
        if state.webhooks.remove(&path).is_some() {
            tracing::info!("🔌 Unregistered webhook {}", path);
        }
        Ok(())
    }

    /// Register the schedule of `workflow_id`, replacing any existing one
    pub async fn register_schedule(
        &self,
        workflow_id: &str,
        cron: &str,
        timezone: &str,
    ) -> Result<ScheduleTrigger, TriggerError> {
        let schedule = CronSchedule::parse(cron, timezone)?;
        let trigger = self.schedule_trigger(workflow_id, &schedule)?;

        let mut state = self.state.lock().await;
        self.store.upsert_schedule(&trigger).await?;
        self.arm(&mut state, trigger.clone(), schedule);
        tracing::info!(
            "⏰ Registered schedule '{}' ({}) for workflow '{}', next run {}",
            cron,
            timezone,
            workflow_id,
            trigger.next_run.map(|t| t.to_rfc3339()).unwrap_or_default()
        );
        Ok(trigger)
    }

    /// Cancel and deactivate the schedule of `workflow_id`; idempotent
    pub async fn unregister_schedule(&self, workflow_id: &str) -> Result<(), TriggerError> {
        let mut state = self.state.lock().await;
        self.store.deactivate_schedule(workflow_id).await?;
        if let Some(mut armed) = state.schedules.remove(workflow_id) {
            armed.disarm();
            tracing::info!("🔕 Unregistered schedule of workflow '{}'", workflow_id);
        }
        Ok(())
    }

    /// Persist a workflow and re-derive its triggers in one step
    ///
    /// The trigger lock is held from the conflict check through the save, so
    /// a concurrent write can never claim a path this workflow was validated
    /// against. Nothing is saved when a registration is rejected.
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<(), TriggerError> {
        let derived = self.derive(workflow)?;
        let mut state = self.state.lock().await;
        for webhook in &derived.webhooks {
            self.check_webhook_conflict(&state, webhook).await?;
        }
        self.store.save_workflow(workflow).await?;
        self.apply(&mut state, &workflow.id, derived).await
    }

    /// Delete a workflow and deactivate all of its triggers
    ///
    /// Returns `false` if the workflow did not exist.
    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<bool, TriggerError> {
        let mut state = self.state.lock().await;
        if !self.store.delete_workflow(workflow_id).await? {
            return Ok(false);
        }
        self.apply(&mut state, workflow_id, DerivedTriggers::default()).await?;
        Ok(true)
    }

    /// Re-derive the triggers of a workflow from its current graph
    ///
    /// Everything is validated before anything is deactivated, so a failed
    /// refresh leaves the previous registrations in place. A workflow that no
    /// longer exists refreshes to zero triggers.
    pub async fn refresh_triggers(&self, workflow_id: &str) -> Result<(), TriggerError> {
        let mut state = self.state.lock().await;
        let derived = match self.store.get_workflow(workflow_id).await? {
            Some(workflow) => self.derive(&workflow)?,
            None => DerivedTriggers::default(),
        };
        for webhook in &derived.webhooks {
            self.check_webhook_conflict(&state, webhook).await?;
        }
        self.apply(&mut state, workflow_id, derived).await
    }

    /// Replace every registration of `workflow_id` with `derived`
    async fn apply(
        &self,
        state: &mut TriggerState,
        workflow_id: &str,
        derived: DerivedTriggers,
    ) -> Result<(), TriggerError> {
        let stale_paths: Vec<String> = state
            .webhooks
            .values()
            .filter(|w| w.workflow_id == workflow_id)
            .map(|w| w.path.clone())
            .collect();
        for path in stale_paths {
            self.store.deactivate_webhook(&path).await?;
            state.webhooks.remove(&path);
        }
        self.store.deactivate_schedule(workflow_id).await?;
        if let Some(mut armed) = state.schedules.remove(workflow_id) {
            armed.disarm();
        }

        let webhook_count = derived.webhooks.len();
        for webhook in derived.webhooks {
            self.store.upsert_webhook(&webhook).await?;
            state.webhooks.insert(webhook.path.clone(), webhook);
        }
        let scheduled = derived.schedule.is_some();
        if let Some((trigger, schedule)) = derived.schedule {
            self.store.upsert_schedule(&trigger).await?;
            self.arm(state, trigger, schedule);
        }

        tracing::info!(
            "🔥 Refreshed triggers of workflow '{}': {} webhooks, {} schedule",
            workflow_id,
            webhook_count,
            if scheduled { "1" } else { "no" }
        );
        Ok(())
    }

    /// A path belongs to one workflow, per the index and the store's active rows
    async fn check_webhook_conflict(
        &self,
        state: &TriggerState,
        webhook: &WebhookTrigger,
    ) -> Result<(), TriggerError> {
        let owner = match state.webhooks.get(&webhook.path) {
            Some(existing) => Some(existing.workflow_id.clone()),
            None => self
                .store
                .active_webhook(&webhook.path)
                .await?
                .map(|existing| existing.workflow_id),
        };
        match owner {
            Some(owner) if owner != webhook.workflow_id => Err(TriggerError::Conflict {
                path: webhook.path.clone(),
                owner,
            }),
            _ => Ok(()),
        }
    }

    /// Route an inbound webhook call to its workflow
    ///
    /// Unknown paths are not an error: they report `triggered: false`.
    pub async fn execute_webhook(&self, request: WebhookRequest) -> WebhookOutcome {
        let Ok(path) = normalize_path(&request.path) else {
            return WebhookOutcome::default();
        };
        let Some(trigger) = self.webhook_for(&path).await else {
            tracing::debug!("🔍 No webhook registered at {}", path);
            return WebhookOutcome::default();
        };

        if !trigger.accepts_method(&request.method) {
            tracing::warn!("🚫 Webhook {} does not accept {}", path, request.method);
            return WebhookOutcome::rejected(
                &trigger.workflow_id,
                WebhookRejection::MethodNotAllowed,
                format!("method {} not allowed, expected {}", request.method, trigger.method),
            );
        }

        let headers: HashMap<String, String> = request
            .headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        if !trigger.auth.verify(&headers) {
            tracing::warn!("🔒 Webhook {} rejected unauthenticated request", path);
            return WebhookOutcome::rejected(
                &trigger.workflow_id,
                WebhookRejection::Unauthorized,
                "webhook authentication failed".to_string(),
            );
        }

        tracing::info!("📥 Webhook {} {} -> workflow '{}'", request.method, path, trigger.workflow_id);
        let input = json!({
            "body": request.body,
            "headers": headers,
            "query": request.query,
            "method": request.method.to_ascii_uppercase(),
        });
        match self
            .coordinator
            .run(&trigger.workflow_id, input, RunMode::Webhook)
            .await
        {
            Ok(result) => WebhookOutcome {
                triggered: true,
                workflow_id: Some(trigger.workflow_id),
                run_id: Some(result.run_id),
                error: result.error.clone(),
                rejection: None,
                result: Some(result),
            },
            Err(e) => {
                tracing::error!("❌ Webhook {} could not start workflow '{}': {}", path, trigger.workflow_id, e);
                WebhookOutcome {
                    triggered: true,
                    workflow_id: Some(trigger.workflow_id),
                    error: Some(e.to_string()),
                    ..WebhookOutcome::default()
                }
            }
        }
    }

    pub async fn webhook_for(&self, path: &str) -> Option<WebhookTrigger> {
        let path = normalize_path(path).ok()?;
        self.state.lock().await.webhooks.get(&path).cloned()
    }

    /// Active webhooks of a workflow, sorted by path
    pub async fn webhooks_of(&self, workflow_id: &str) -> Vec<WebhookTrigger> {
        let state = self.state.lock().await;
        let mut webhooks: Vec<WebhookTrigger> = state
            .webhooks
            .values()
            .filter(|w| w.workflow_id == workflow_id)
            .cloned()
            .collect();
        webhooks.sort_by(|a, b| a.path.cmp(&b.path));
        webhooks
    }

    pub async fn schedule_for(&self, workflow_id: &str) -> Option<ScheduleTrigger> {
        self.state
            .lock()
            .await
            .schedules
            .get(workflow_id)
            .map(|armed| armed.trigger.clone())
    }

    fn schedule_trigger(&self, workflow_id: &str, schedule: &CronSchedule) -> Result<ScheduleTrigger, TriggerError> {
        let next_run = schedule
            .next_after(self.clock.now())
            .ok_or_else(|| TriggerError::NoUpcoming(schedule.expression().to_string()))?;
        Ok(ScheduleTrigger {
            workflow_id: workflow_id.to_string(),
            cron: schedule.expression().to_string(),
            timezone: schedule.timezone().name().to_string(),
            active: true,
            last_run: None,
            next_run: Some(next_run),
        })
    }

    /// Collect the trigger registrations declared by a workflow's nodes
    fn derive(&self, workflow: &Workflow) -> Result<DerivedTriggers, TriggerError> {
        let mut derived = DerivedTriggers::default();

        for node in workflow.nodes_of_type(WEBHOOK_NODE) {
            let invalid = |reason: String| TriggerError::InvalidTriggerNode {
                node_id: node.id.clone(),
                reason,
            };
            let path = node
                .param_str("path")
                .ok_or_else(|| invalid("missing 'path' parameter".to_string()))?;
            let method = node.param_str("method").unwrap_or("POST");
            let auth = match node.parameters.get("auth") {
                None | Some(Value::Null) => WebhookAuth::None,
                Some(raw) => serde_json::from_value(raw.clone())
                    .map_err(|e| invalid(format!("invalid 'auth' parameter: {}", e)))?,
            };
            let webhook = webhook_trigger(&workflow.id, path, method, auth)?;
            if derived.webhooks.iter().any(|w| w.path == webhook.path) {
                return Err(invalid(format!("path {} is declared twice", webhook.path)));
            }
            derived.webhooks.push(webhook);
        }

        let schedule_nodes = workflow.nodes_of_type(SCHEDULE_NODE);
        if let Some((node, ignored)) = schedule_nodes.split_first() {
            for extra in ignored {
                tracing::warn!(
                    "⚠️ Workflow '{}' has several schedule nodes, ignoring '{}' in favour of '{}'",
                    workflow.id,
                    extra.id,
                    node.id
                );
            }
            let cron = node.param_str("cron").ok_or_else(|| TriggerError::InvalidTriggerNode {
                node_id: node.id.clone(),
                reason: "missing 'cron' parameter".to_string(),
            })?;
            let timezone = node.param_str("timezone").unwrap_or("UTC");
            let schedule = CronSchedule::parse(cron, timezone)?;
            let trigger = self.schedule_trigger(&workflow.id, &schedule)?;
            derived.schedule = Some((trigger, schedule));
        }

        Ok(derived)
    }

    /// Arm (or re-arm) a schedule, replacing any armed timer for the workflow
    fn arm(&self, state: &mut TriggerState, trigger: ScheduleTrigger, schedule: CronSchedule) {
        let workflow_id = trigger.workflow_id.clone();
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let timer = trigger
            .next_run
            .map(|at| self.spawn_timer(workflow_id.clone(), generation, at));
        let armed = ArmedSchedule {
            trigger,
            schedule,
            generation,
            timer,
        };
        if let Some(mut previous) = state.schedules.insert(workflow_id, armed) {
            previous.disarm();
        }
    }

    fn spawn_timer(&self, workflow_id: String, generation: u64, at: DateTime<Utc>) -> JoinHandle<()> {
        let delay = (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!("⏲️ Arming schedule of '{}' in {:?} (generation {})", workflow_id, delay, generation);
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.fire(&workflow_id, generation).await;
        })
    }

    /// Timer callback: reschedule first, then run the workflow
    async fn fire(&self, workflow_id: &str, generation: u64) {
        let fired_at = {
            let mut state = self.state.lock().await;
            let Some(armed) = state.schedules.get_mut(workflow_id) else {
                return;
            };
            if armed.generation != generation {
                tracing::debug!("💤 Ignoring stale timer of '{}' (generation {})", workflow_id, generation);
                return;
            }

            let now = self.clock.now();
            let fired_at = match armed.trigger.next_run {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            let next_run = armed.schedule.next_after(fired_at);
            armed.trigger.last_run = Some(fired_at);
            armed.trigger.next_run = next_run;

            let persisted = match next_run {
                Some(next_run) => {
                    let next_generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
                    armed.generation = next_generation;
                    // Replacing the handle detaches this very task instead of aborting it.
                    armed.timer = Some(self.spawn_timer(workflow_id.to_string(), next_generation, next_run));
                    self.store
                        .record_schedule_fire(workflow_id, fired_at, next_run)
                        .await
                }
                None => {
                    tracing::warn!("⚠️ Schedule of workflow '{}' has no further occurrences", workflow_id);
                    armed.timer = None;
                    self.store.upsert_schedule(&armed.trigger).await
                }
            };
            if let Err(e) = persisted {
                tracing::warn!("⚠️ Failed to persist schedule fire of '{}': {}", workflow_id, e);
            }
            fired_at
        };

        tracing::info!("⏰ Schedule fired for workflow '{}' at {}", workflow_id, fired_at);
        let input = json!({
            "trigger": "schedule",
            "workflowId": workflow_id,
            "firedAt": fired_at.to_rfc3339(),
        });
        match self.coordinator.run(workflow_id, input, RunMode::Schedule).await {
            Ok(result) if result.success => {
                tracing::info!("✅ Scheduled run {} of '{}' completed", result.run_id, workflow_id)
            }
            Ok(result) => tracing::error!(
                "❌ Scheduled run {} of '{}' ended {}: {}",
                result.run_id,
                workflow_id,
                result.status,
                result.error.unwrap_or_default()
            ),
            Err(e) => tracing::error!("❌ Scheduled run of '{}' could not start: {}", workflow_id, e),
        }
    }
}

fn webhook_trigger(
    workflow_id: &str,
    path: &str,
    method: &str,
    auth: WebhookAuth,
) -> Result<WebhookTrigger, TriggerError> {
    let method = method.trim().to_ascii_uppercase();
    if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(TriggerError::InvalidMethod(method));
    }
    Ok(WebhookTrigger {
        workflow_id: workflow_id.to_string(),
        path: normalize_path(path)?,
        method: if method == ANY_METHOD { ANY_METHOD.to_string() } else { method },
        auth,
        active: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::credentials::StaticCredentials;
    use crate::nodes::register_builtin;
    use crate::runtime::registry::HandlerRegistry;
    use crate::storage::MemoryStore;
    use crate::triggers::schedule::ManualClock;
    use crate::workflow::types::Node;
    use chrono::TimeZone;

    fn manager_with(clock: Arc<dyn Clock>) -> (TriggerManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(HandlerRegistry::new());
        register_builtin(&registry);
        let coordinator = Arc::new(ExecutionCoordinator::new(
            store.clone(),
            store.clone(),
            registry,
            Arc::new(StaticCredentials::new()),
            &ExecutionConfig {
                ledger_write_attempts: 1,
                event_buffer: 16,
            },
        ));
        (TriggerManager::new(store.clone(), coordinator, clock), store)
    }

    fn clock_at(h: u32, m: u32, s: u32) -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()))
    }

    #[tokio::test]
    async fn webhook_paths_belong_to_one_workflow() {
        let (manager, _) = manager_with(clock_at(10, 0, 0));

        manager
            .register_webhook("wf-a", "orders", "post", WebhookAuth::None)
            .await
            .unwrap();
        let err = manager
            .register_webhook("wf-b", "/orders/", "POST", WebhookAuth::None)
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::Conflict { ref owner, .. } if owner == "wf-a"));

        let again = manager
            .register_webhook("wf-a", "/orders", "PUT", WebhookAuth::None)
            .await
            .unwrap();
        assert_eq!(again.method, "PUT");
        assert_eq!(manager.webhook_for("orders").await.unwrap().method, "PUT");
    }

    #[tokio::test]
    async fn unregistering_is_idempotent() {
        let (manager, store) = manager_with(clock_at(10, 0, 0));
        manager
            .register_webhook("wf", "/hook", "POST", WebhookAuth::None)
            .await
            .unwrap();
        manager.register_schedule("wf", "0 * * * *", "UTC").await.unwrap();

        for _ in 0..2 {
            manager.unregister_webhook("/hook").await.unwrap();
            manager.unregister_schedule("wf").await.unwrap();
        }
        assert!(manager.webhook_for("/hook").await.is_none());
        assert!(manager.schedule_for("wf").await.is_none());
        assert!(store.list_active_webhooks().await.unwrap().is_empty());
        assert!(store.list_active_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_webhook_is_not_triggered() {
        let (manager, _) = manager_with(clock_at(10, 0, 0));
        let outcome = manager
            .execute_webhook(WebhookRequest {
                path: "/nothing".into(),
                method: "POST".into(),
                ..WebhookRequest::default()
            })
            .await;
        assert!(!outcome.triggered);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn register_schedule_computes_next_run_in_timezone() {
        let (manager, _) = manager_with(clock_at(10, 0, 0));
        let trigger = manager
            .register_schedule("wf", "30 9 * * *", "Asia/Jakarta")
            .await
            .unwrap();
        // 09:30 WIB is 02:30 UTC, already past on the 1st
        assert_eq!(
            trigger.next_run,
            Some(Utc.with_ymd_and_hms(2024, 3, 2, 2, 30, 0).unwrap())
        );
        assert!(matches!(
            manager.register_schedule("wf", "not a cron", "UTC").await,
            Err(TriggerError::InvalidCron { .. })
        ));
        // The rejected registration leaves the previous one armed.
        assert_eq!(manager.schedule_for("wf").await.unwrap().cron, "30 9 * * *");
    }

    #[tokio::test]
    async fn refresh_rejects_conflicts_without_touching_existing_triggers() {
        let (manager, store) = manager_with(clock_at(10, 0, 0));
        manager
            .register_webhook("owner", "/shared", "POST", WebhookAuth::None)
            .await
            .unwrap();

        let workflow = Workflow::new("wf", "Wf")
            .with_node(Node::new("hook", WEBHOOK_NODE).with_param("path", json!("/mine")))
            .with_node(Node::new("tick", SCHEDULE_NODE).with_param("cron", json!("*/5 * * * *")));
        store.save_workflow(&workflow).await.unwrap();
        manager.refresh_triggers("wf").await.unwrap();
        assert_eq!(manager.webhooks_of("wf").await.len(), 1);

        let conflicting = workflow
            .clone()
            .with_node(Node::new("hook2", WEBHOOK_NODE).with_param("path", json!("/shared")));
        store.save_workflow(&conflicting).await.unwrap();
        assert!(matches!(
            manager.refresh_triggers("wf").await,
            Err(TriggerError::Conflict { .. })
        ));
        assert_eq!(manager.webhooks_of("wf").await[0].path, "/mine");
        assert!(manager.schedule_for("wf").await.is_some());
    }

    fn hooked(id: &str, path: &str) -> Workflow {
        Workflow::new(id, id).with_node(Node::new("hook", WEBHOOK_NODE).with_param("path", json!(path)))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writes_claiming_one_path_save_only_the_winner() {
        let (manager, store) = manager_with(clock_at(10, 0, 0));
        let wf_a = hooked("wf-a", "/p");
        let wf_b = hooked("wf-b", "/p");
        let (first, second) = tokio::join!(
            manager.save_workflow(&wf_a),
            manager.save_workflow(&wf_b),
        );

        let (winner, loser) = match (first, second) {
            (Ok(()), Err(TriggerError::Conflict { .. })) => ("wf-a", "wf-b"),
            (Err(TriggerError::Conflict { .. }), Ok(())) => ("wf-b", "wf-a"),
            other => panic!("expected exactly one conflict, got {:?}", other),
        };
        assert_eq!(manager.webhook_for("/p").await.unwrap().workflow_id, winner);
        assert!(store.get_workflow(winner).await.unwrap().is_some());
        assert!(store.get_workflow(loser).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_update_keeps_the_stored_graph() {
        let (manager, store) = manager_with(clock_at(10, 0, 0));
        manager.save_workflow(&hooked("owner", "/shared")).await.unwrap();
        manager.save_workflow(&hooked("wf", "/mine")).await.unwrap();

        let err = manager.save_workflow(&hooked("wf", "/shared")).await.unwrap_err();
        assert!(matches!(err, TriggerError::Conflict { ref owner, .. } if owner == "owner"));
        let stored = store.get_workflow("wf").await.unwrap().unwrap();
        assert_eq!(stored.nodes[0].param_str("path"), Some("/mine"));
        assert_eq!(manager.webhooks_of("wf").await[0].path, "/mine");

        assert!(manager.delete_workflow("wf").await.unwrap());
        assert!(manager.webhook_for("/mine").await.is_none());
        assert!(!manager.delete_workflow("wf").await.unwrap());
    }

    #[tokio::test]
    async fn paths_owned_in_the_store_conflict_before_start() {
        let (manager, store) = manager_with(clock_at(10, 0, 0));
        store
            .upsert_webhook(&WebhookTrigger {
                workflow_id: "other".into(),
                path: "/taken".into(),
                method: "POST".into(),
                auth: WebhookAuth::None,
                active: true,
            })
            .await
            .unwrap();

        assert!(matches!(
            manager.register_webhook("wf", "/taken", "POST", WebhookAuth::None).await,
            Err(TriggerError::Conflict { ref owner, .. }) if owner == "other"
        ));
        store.save_workflow(&hooked("wf", "/taken")).await.unwrap();
        assert!(matches!(
            manager.refresh_triggers("wf").await,
            Err(TriggerError::Conflict { .. })
        ));
        assert_eq!(store.active_webhook("/taken").await.unwrap().unwrap().workflow_id, "other");
    }
}
