/// Workflow management layer
///
/// This module holds the persisted graph model and the store contract:
/// - Type definitions (Workflow, Node, Edge) with node execution policy
/// - The `WorkflowStore` trait used by the coordinator and trigger manager

// Core workflow type definitions
pub mod types;

// Persistence contract for workflows and trigger registrations
pub mod storage;

// Re-export commonly used types
pub use storage::{StoreError, WorkflowMetadata, WorkflowStore};
pub use types::{Edge, Node, Workflow, MAIN_PORT};
