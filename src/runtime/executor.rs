/// Execution coordinator
///
/// Drives one workflow run from start nodes to terminal nodes:
/// - Loads the graph and resolves it into an execution plan
/// - Dispatches ready nodes concurrently, joining on all upstream edges
/// - Applies the retry and continue-on-fail policy of each node
/// - Mirrors every transition to the execution ledger and the event channel
///
/// A worklist of ready nodes replaces recursive fan-out, so a node is
/// dispatched exactly once per run no matter how many edges feed it.

use crate::{
    config::ExecutionConfig,
    credentials::CredentialResolver,
    runtime::{
        error::{ExecutionError, NodeError},
        events::ExecutionEvent,
        ledger::{ExecutionLedger, Run, RunMode, RunStatus},
        registry::{output_snapshot, port_value, HandlerRegistry, NodeContext, NodeHandler, Output},
        resolver::{self, ExecutionPlan},
    },
    workflow::{storage::WorkflowStore, types::Workflow},
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, RwLock},
    task::{self, JoinHandle, JoinSet},
};
use uuid::Uuid;

/// Terminal result of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub success: bool,
    pub status: RunStatus,
    /// Terminal node id -> that node's port -> data snapshot
    pub output: Value,
    pub error: Option<String>,
    pub failed_node: Option<String>,
}

/// Handle on an in-flight run
struct ActiveRun {
    workflow_id: String,
    cancelled: Arc<AtomicBool>,
}

/// Everything validated up front, before any node runs
struct PreparedRun {
    workflow: Workflow,
    plan: ExecutionPlan,
    run: Run,
    cancelled: Arc<AtomicBool>,
}

/// Per-node retry and failure policy, copied out of the graph
#[derive(Debug, Clone, Copy)]
struct NodePolicy {
    retry_on_fail: bool,
    max_retries: u32,
    retry_delay: Duration,
}

/// What came back from one node task
struct NodeOutcome {
    node_id: String,
    result: Result<Vec<Output>, NodeError>,
    retries: u32,
}

pub struct ExecutionCoordinator {
    store: Arc<dyn WorkflowStore>,
    ledger: Arc<dyn ExecutionLedger>,
    registry: Arc<HandlerRegistry>,
    credentials: Arc<dyn CredentialResolver>,
    http: reqwest::Client,
    events: broadcast::Sender<ExecutionEvent>,
    active: RwLock<HashMap<Uuid, ActiveRun>>,
    ledger_write_attempts: u32,
}

impl ExecutionCoordinator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        ledger: Arc<dyn ExecutionLedger>,
        registry: Arc<HandlerRegistry>,
        credentials: Arc<dyn CredentialResolver>,
        config: &ExecutionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            store,
            ledger,
            registry,
            credentials,
            http: reqwest::Client::new(),
            events,
            active: RwLock::new(HashMap::new()),
            ledger_write_attempts: config.ledger_write_attempts.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Receive run and node transition events
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Run a workflow to completion
    ///
    /// Graph and lookup problems are returned as errors before any run is
    /// created. Everything that happens once nodes execute is reported in the
    /// returned [`RunResult`].
    #[tracing::instrument(skip(self, input), fields(workflow_id = %workflow_id, mode = %mode))]
    pub async fn run(
        &self,
        workflow_id: &str,
        input: Value,
        mode: RunMode,
    ) -> Result<RunResult, ExecutionError> {
        let prepared = self.prepare(workflow_id, input, mode).await?;
        Ok(self.execute(prepared).await)
    }

    /// Start a run in the background and return its id immediately
    pub async fn spawn(
        self: &Arc<Self>,
        workflow_id: &str,
        input: Value,
        mode: RunMode,
    ) -> Result<(Uuid, JoinHandle<RunResult>), ExecutionError> {
        let prepared = self.prepare(workflow_id, input, mode).await?;
        let run_id = prepared.run.id;
        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move { coordinator.execute(prepared).await });
        Ok((run_id, handle))
    }

    /// Request cancellation of an in-flight run
    ///
    /// Returns `false` if the run is unknown or already finished.
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        match self.active.read().await.get(&run_id) {
            Some(active) => {
                active.cancelled.store(true, Ordering::SeqCst);
                tracing::info!("🛑 Cancellation requested for run {}", run_id);
                true
            }
            None => false,
        }
    }

    /// Whether any run of the workflow is in flight
    pub async fn is_running(&self, workflow_id: &str) -> bool {
        self.active
            .read()
            .await
            .values()
            .any(|a| a.workflow_id == workflow_id)
    }

    async fn prepare(
        &self,
        workflow_id: &str,
        input: Value,
        mode: RunMode,
    ) -> Result<PreparedRun, ExecutionError> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| ExecutionError::WorkflowNotFound(workflow_id.to_string()))?;

        let plan = resolver::resolve(&workflow).map_err(|e| {
            tracing::error!("❌ Workflow '{}' cannot be executed: {}", workflow_id, e);
            e
        })?;

        let run = Run::new(workflow_id, mode, input, plan.order.iter());
        let cancelled = Arc::new(AtomicBool::new(false));
        self.active.write().await.insert(
            run.id,
            ActiveRun {
                workflow_id: workflow_id.to_string(),
                cancelled: Arc::clone(&cancelled),
            },
        );

        Ok(PreparedRun {
            workflow,
            plan,
            run,
            cancelled,
        })
    }

    async fn execute(&self, prepared: PreparedRun) -> RunResult {
        let PreparedRun {
            workflow,
            plan,
            mut run,
            cancelled,
        } = prepared;
        let run_id = run.id;
        let start_time = std::time::Instant::now();

        run.start();
        if let Err(e) = self.ledger.create_run(&run).await {
            tracing::warn!("⚠️ Ledger failed to record run {}: {}", run_id, e);
        }
        self.emit(ExecutionEvent::RunStarted {
            run_id,
            workflow_id: workflow.id.clone(),
            mode: run.mode,
        });
        tracing::info!(
            "🚀 Run {} started for workflow '{}' ({} nodes, mode {})",
            run_id,
            workflow.id,
            plan.order.len(),
            run.mode
        );

        let mut pending_joins: HashMap<&str, usize> = plan
            .order
            .iter()
            .map(|id| (id.as_str(), plan.upstream_edges(id).len()))
            .collect();
        let mut edge_values: HashMap<usize, Value> = HashMap::new();
        let mut snapshots: HashMap<String, Value> = HashMap::new();
        let mut ready: VecDeque<String> = plan.start_nodes.iter().cloned().collect();
        let mut in_flight: JoinSet<NodeOutcome> = JoinSet::new();
        let mut task_nodes: HashMap<task::Id, String> = HashMap::new();
        let mut dispatched = 0usize;
        let mut abort: Option<(String, String)> = None;

        loop {
            while abort.is_none() && !cancelled.load(Ordering::SeqCst) {
                let Some(node_id) = ready.pop_front() else {
                    break;
                };
                let Some(node) = workflow.node(&node_id) else {
                    continue;
                };

                let input = if plan.is_start_node(&node_id) {
                    run.input.clone()
                } else {
                    merge_inputs(&workflow, plan.upstream_edges(&node_id), &mut edge_values)
                };

                run.node_started(&node_id, input.clone());
                self.persist(&run).await;
                self.emit(ExecutionEvent::NodeStarted {
                    run_id,
                    node_id: node_id.clone(),
                });
                tracing::debug!("📥 Node '{}' input: {}", node_id, input);

                let ctx = NodeContext {
                    run_id,
                    workflow_id: workflow.id.clone(),
                    node_id: node_id.clone(),
                    node_type: node.node_type.clone(),
                    parameters: node.parameters.clone(),
                    input,
                    credentials: Arc::clone(&self.credentials),
                    http: self.http.clone(),
                };
                let policy = NodePolicy {
                    retry_on_fail: node.retry_on_fail,
                    max_retries: node.max_retries,
                    retry_delay: Duration::from_millis(node.retry_delay_ms),
                };
                let handler = self.registry.resolve(&node.node_type);
                let events = self.events.clone();
                let handle = in_flight.spawn(invoke_node(handler, ctx, policy, events));
                task_nodes.insert(handle.id(), node_id.clone());
                dispatched += 1;
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                break;
            };
            let outcome = match joined {
                Ok((task_id, outcome)) => {
                    task_nodes.remove(&task_id);
                    outcome
                }
                Err(e) => match task_nodes.remove(&e.id()) {
                    Some(node_id) => lost_task_outcome(node_id, e),
                    None => {
                        tracing::error!("💥 Unknown node task for run {} was lost: {}", run_id, e);
                        continue;
                    }
                },
            };
            let NodeOutcome {
                node_id,
                result,
                retries,
            } = outcome;

            match result {
                Ok(outputs) => {
                    let snapshot = output_snapshot(&outputs);
                    tracing::debug!("📤 Node '{}' output: {}", node_id, snapshot);
                    run.node_completed(&node_id, snapshot.clone(), retries);
                    snapshots.insert(node_id.clone(), snapshot);
                    self.emit(ExecutionEvent::NodeCompleted {
                        run_id,
                        node_id: node_id.clone(),
                    });
                    for &edge_idx in plan.downstream_edges(&node_id) {
                        let edge = &workflow.edges[edge_idx];
                        edge_values.insert(edge_idx, port_value(&outputs, &edge.source_port));
                        release(&edge.target, &mut pending_joins, &mut ready);
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    run.node_failed(&node_id, message.clone(), retries);
                    self.emit(ExecutionEvent::NodeFailed {
                        run_id,
                        node_id: node_id.clone(),
                        error: message.clone(),
                    });

                    let continue_on_fail = workflow
                        .node(&node_id)
                        .map(|n| n.continue_on_fail)
                        .unwrap_or(false);
                    if continue_on_fail {
                        tracing::warn!(
                            "⚠️ Node '{}' failed, continuing with null output: {}",
                            node_id,
                            message
                        );
                        for &edge_idx in plan.downstream_edges(&node_id) {
                            let edge = &workflow.edges[edge_idx];
                            edge_values.insert(edge_idx, Value::Null);
                            release(&edge.target, &mut pending_joins, &mut ready);
                        }
                    } else {
                        tracing::error!("❌ Node '{}' failed, aborting run {}: {}", node_id, run_id, message);
                        if abort.is_none() {
                            abort = Some((node_id.clone(), message));
                        }
                    }
                }
            }
            self.persist(&run).await;
        }

        let output = terminal_output(&plan, &snapshots);
        let (status, error, failed_node) = match abort {
            Some((node_id, message)) => (RunStatus::Error, Some(message), Some(node_id)),
            None if cancelled.load(Ordering::SeqCst) && dispatched < plan.order.len() => {
                (RunStatus::Cancelled, Some("run cancelled".to_string()), None)
            }
            None => (RunStatus::Completed, None, None),
        };
        run.finalize(status, output.clone(), error.clone(), failed_node.clone());
        self.persist_final(&run).await;

        self.active.write().await.remove(&run_id);
        self.emit(ExecutionEvent::RunFinished {
            run_id,
            workflow_id: workflow.id.clone(),
            status,
        });

        let duration = start_time.elapsed();
        match status {
            RunStatus::Completed => {
                tracing::info!("✅ Run {} completed in {:?}", run_id, duration)
            }
            RunStatus::Cancelled => {
                tracing::info!("🛑 Run {} cancelled after {:?}", run_id, duration)
            }
            _ => tracing::error!(
                "❌ Run {} failed in {:?} at node '{}': {}",
                run_id,
                duration,
                failed_node.as_deref().unwrap_or("-"),
                error.as_deref().unwrap_or("unknown error")
            ),
        }

        RunResult {
            run_id,
            success: status == RunStatus::Completed,
            status,
            output,
            error,
            failed_node,
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn persist(&self, run: &Run) {
        if let Err(e) = self.ledger.update_run(run).await {
            tracing::warn!("⚠️ Ledger write failed for run {}: {}", run.id, e);
        }
    }

    async fn persist_final(&self, run: &Run) {
        for attempt in 1..=self.ledger_write_attempts {
            match self.ledger.update_run(run).await {
                Ok(()) => return,
                Err(e) if attempt < self.ledger_write_attempts => {
                    tracing::warn!(
                        "⚠️ Final ledger write for run {} failed (attempt {}/{}): {}",
                        run.id,
                        attempt,
                        self.ledger_write_attempts,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(e) => {
                    tracing::error!(
                        "🔥 Giving up on final ledger write for run {} after {} attempts: {}",
                        run.id,
                        attempt,
                        e
                    );
                }
            }
        }
    }
}

/// Input for a joined node
///
/// One upstream edge passes its value through unchanged. Several upstream
/// edges produce an object keyed by `<source node>.<source port>`, so every
/// source stays distinct even when all of them feed the same input port.
fn merge_inputs(workflow: &Workflow, upstream: &[usize], edge_values: &mut HashMap<usize, Value>) -> Value {
    if let [only] = upstream {
        return edge_values.remove(only).unwrap_or(Value::Null);
    }
    let mut merged = Map::new();
    for edge_idx in upstream {
        let edge = &workflow.edges[*edge_idx];
        let value = edge_values.remove(edge_idx).unwrap_or(Value::Null);
        merged.insert(join_key(&edge.source, &edge.source_port), value);
    }
    Value::Object(merged)
}

/// Key of one source in a joined input
fn join_key(source: &str, source_port: &str) -> String {
    format!("{}.{}", source, source_port)
}

/// Count one delivered edge against `target` and queue it once all arrived
fn release(target: &str, pending_joins: &mut HashMap<&str, usize>, ready: &mut VecDeque<String>) {
    if let Some(remaining) = pending_joins.get_mut(target) {
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            ready.push_back(target.to_string());
        }
    }
}

fn terminal_output(plan: &ExecutionPlan, snapshots: &HashMap<String, Value>) -> Value {
    let output: Map<String, Value> = plan
        .terminal_nodes()
        .map(|id| (id.to_string(), snapshots.get(id).cloned().unwrap_or(Value::Null)))
        .collect();
    Value::Object(output)
}

/// Run one node with its retry policy
async fn invoke_node(
    handler: Result<Arc<dyn NodeHandler>, NodeError>,
    ctx: NodeContext,
    policy: NodePolicy,
    events: broadcast::Sender<ExecutionEvent>,
) -> NodeOutcome {
    let node_id = ctx.node_id.clone();
    let handler = match handler.and_then(|h| check_parameters(h, &ctx)) {
        Ok(handler) => handler,
        Err(err) => {
            return NodeOutcome {
                node_id,
                result: Err(err),
                retries: 0,
            }
        }
    };

    let mut retries = 0;
    loop {
        let result = invoke_isolated(Arc::clone(&handler), ctx.clone()).await;
        match result {
            Err(err) if policy.retry_on_fail && err.is_retryable() && retries < policy.max_retries => {
                retries += 1;
                tracing::warn!(
                    "🔁 Retrying node '{}' ({}/{}) after error: {}",
                    node_id,
                    retries,
                    policy.max_retries,
                    err
                );
                let _ = events.send(ExecutionEvent::NodeRetrying {
                    run_id: ctx.run_id,
                    node_id: node_id.clone(),
                    attempt: retries,
                    error: err.to_string(),
                });
                tokio::time::sleep(policy.retry_delay).await;
            }
            result => {
                return NodeOutcome {
                    node_id,
                    result,
                    retries,
                }
            }
        }
    }
}

fn check_parameters(
    handler: Arc<dyn NodeHandler>,
    ctx: &NodeContext,
) -> Result<Arc<dyn NodeHandler>, NodeError> {
    let missing: Vec<&str> = handler
        .required_parameters()
        .iter()
        .copied()
        .filter(|name| matches!(ctx.parameters.get(*name), None | Some(Value::Null)))
        .collect();
    if missing.is_empty() {
        Ok(handler)
    } else {
        Err(NodeError::NotConfigured {
            node_id: ctx.node_id.clone(),
            reason: format!("missing required parameters: {}", missing.join(", ")),
        })
    }
}

/// Failure outcome for a node whose task died outside the handler
fn lost_task_outcome(node_id: String, err: task::JoinError) -> NodeOutcome {
    tracing::error!("💥 Node task for '{}' was lost: {}", node_id, err);
    NodeOutcome {
        result: Err(NodeError::Execution {
            node_id: node_id.clone(),
            message: format!("node task failed: {}", err),
        }),
        node_id,
        retries: 0,
    }
}

/// Invoke the handler on its own task so a panic fails only this node
async fn invoke_isolated(handler: Arc<dyn NodeHandler>, ctx: NodeContext) -> Result<Vec<Output>, NodeError> {
    let node_id = ctx.node_id.clone();
    let task = tokio::spawn(async move { handler.execute(&ctx).await });
    match task.await {
        Ok(Ok(outputs)) => Ok(outputs),
        Ok(Err(err)) => Err(NodeError::from_handler(&node_id, err)),
        Err(join_err) => Err(NodeError::Execution {
            node_id,
            message: format!("handler panicked: {}", join_err),
        }),
    }
}
