/// Runtime execution engine
///
/// This module turns a stored workflow graph into a run:
/// - Graph validation and dependency ordering (petgraph)
/// - Node handler registry with lock-free lookups (ArcSwap)
/// - Worklist-driven coordinator with joins, retries and cancellation
/// - Run records, the ledger contract and transition events

// Error taxonomy shared by the runtime
pub mod error;

// Graph validation and execution plans
pub mod resolver;

// Node handler contract and registry
pub mod registry;

// Run records and the execution ledger contract
pub mod ledger;

// Run and node transition events
pub mod events;

// Execution coordinator
pub mod executor;

pub use error::{ExecutionError, GraphError, HandlerError, LedgerError, NodeError};
pub use events::ExecutionEvent;
pub use executor::{ExecutionCoordinator, RunResult};
pub use ledger::{ExecutionLedger, NodeState, NodeStatus, Run, RunMode, RunStatus};
pub use registry::{HandlerRegistry, NodeContext, NodeHandler, Output};
pub use resolver::{resolve, ExecutionPlan};
