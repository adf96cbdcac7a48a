//! Run and node transition events
//!
//! The coordinator publishes these on a broadcast channel; UI relays, loggers
//! and tests subscribe through `ExecutionCoordinator::subscribe`.

use crate::runtime::ledger::{RunMode, RunStatus};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        workflow_id: String,
        mode: RunMode,
    },
    NodeStarted {
        run_id: Uuid,
        node_id: String,
    },
    NodeRetrying {
        run_id: Uuid,
        node_id: String,
        attempt: u32,
        error: String,
    },
    NodeCompleted {
        run_id: Uuid,
        node_id: String,
    },
    NodeFailed {
        run_id: Uuid,
        node_id: String,
        error: String,
    },
    RunFinished {
        run_id: Uuid,
        workflow_id: String,
        status: RunStatus,
    },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::NodeStarted { run_id, .. }
            | ExecutionEvent::NodeRetrying { run_id, .. }
            | ExecutionEvent::NodeCompleted { run_id, .. }
            | ExecutionEvent::NodeFailed { run_id, .. }
            | ExecutionEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}
