//! Run records and the execution ledger contract
//!
//! The coordinator owns a `Run` for the lifetime of an execution and mirrors
//! it to an [`ExecutionLedger`] after every transition. Storage mechanics live
//! in `crate::storage`.

use crate::runtime::error::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Manual,
    Webhook,
    Schedule,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Manual => "manual",
            RunMode::Webhook => "webhook",
            RunMode::Schedule => "schedule",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Waiting,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Waiting => "waiting",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, error and cancelled runs are final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Error | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node status within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Waiting,
    Running,
    Completed,
    Error,
}

/// State of one node within one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Input snapshot taken when the node was dispatched
    pub input: Option<Value>,
    /// Output snapshot, port -> data
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Re-invocations after the first attempt
    pub retry_count: u32,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            status: NodeStatus::Waiting,
            started_at: None,
            finished_at: None,
            input: None,
            output: None,
            error: None,
            retry_count: 0,
        }
    }
}

/// One execution instance of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub workflow_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Node whose failure ended the run
    pub failed_node: Option<String>,
    pub nodes: BTreeMap<String, NodeState>,
}

impl Run {
    /// Create a waiting run with a waiting state for every node
    pub fn new<'a, I>(workflow_id: &str, mode: RunMode, input: Value, node_ids: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.to_string(),
            mode,
            status: RunStatus::Waiting,
            started_at: Utc::now(),
            finished_at: None,
            input,
            output: None,
            error: None,
            failed_node: None,
            nodes: node_ids
                .into_iter()
                .map(|id| (id.clone(), NodeState::default()))
                .collect(),
        }
    }

    pub fn start(&mut self) {
        if self.status == RunStatus::Waiting {
            self.status = RunStatus::Running;
            self.started_at = Utc::now();
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeState> {
        self.nodes.get(node_id)
    }

    pub(crate) fn node_started(&mut self, node_id: &str, input: Value) {
        if let Some(state) = self.nodes.get_mut(node_id) {
            state.status = NodeStatus::Running;
            state.started_at = Some(Utc::now());
            state.input = Some(input);
        }
    }

    pub(crate) fn node_completed(&mut self, node_id: &str, output: Value, retry_count: u32) {
        if let Some(state) = self.nodes.get_mut(node_id) {
            state.status = NodeStatus::Completed;
            state.finished_at = Some(Utc::now());
            state.output = Some(output);
            state.retry_count = retry_count;
        }
    }

    pub(crate) fn node_failed(&mut self, node_id: &str, error: String, retry_count: u32) {
        if let Some(state) = self.nodes.get_mut(node_id) {
            state.status = NodeStatus::Error;
            state.finished_at = Some(Utc::now());
            state.error = Some(error);
            state.retry_count = retry_count;
        }
    }

    /// Finalize the run. Returns `false` if it was already final.
    pub(crate) fn finalize(
        &mut self,
        status: RunStatus,
        output: Value,
        error: Option<String>,
        failed_node: Option<String>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.output = Some(output);
        self.error = error;
        self.failed_node = failed_node;
        true
    }
}

/// Persistence contract for runs and per-node state
///
/// The coordinator calls it but never depends on it succeeding: write failures
/// are logged and the run carries on.
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    async fn create_run(&self, run: &Run) -> Result<(), LedgerError>;

    async fn update_run(&self, run: &Run) -> Result<(), LedgerError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, LedgerError>;

    /// Most recent runs of a workflow, newest first
    async fn list_runs(&self, workflow_id: &str, limit: usize) -> Result<Vec<Run>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Run {
        let ids = vec!["a".to_string(), "b".to_string()];
        Run::new("wf", RunMode::Manual, json!({"x": 1}), ids.iter())
    }

    #[test]
    fn new_run_waits_with_waiting_nodes() {
        let run = sample();
        assert_eq!(run.status, RunStatus::Waiting);
        assert_eq!(run.nodes.len(), 2);
        assert!(run.nodes.values().all(|n| n.status == NodeStatus::Waiting));
    }

    #[test]
    fn finalize_happens_once() {
        let mut run = sample();
        run.start();
        assert!(run.finalize(RunStatus::Completed, json!({}), None, None));
        assert!(!run.finalize(RunStatus::Error, json!(null), Some("late".into()), None));
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.error, None);
    }

    #[test]
    fn node_transitions_record_snapshots() {
        let mut run = sample();
        run.node_started("a", json!(1));
        run.node_completed("a", json!({"main": 2}), 1);
        let state = run.node("a").unwrap();
        assert_eq!(state.status, NodeStatus::Completed);
        assert_eq!(state.input, Some(json!(1)));
        assert_eq!(state.retry_count, 1);
    }
}
