/// Nodeflow: node-graph workflow execution and trigger orchestration
///
/// This library provides the workflow engine: graph validation, a concurrent
/// execution coordinator with retries and cancellation, webhook and cron
/// triggers, built-in node handlers and the HTTP surface over them.

// Core configuration and setup
pub mod config;

// Credential lookup for node handlers
pub mod credentials;

// Workflow model and store contract
pub mod workflow;

// Runtime execution engine - petgraph validation and run coordination
pub mod runtime;

// Webhook and schedule triggers
pub mod triggers;

// Built-in node handlers
pub mod nodes;

// Store and ledger backends (memory, SQLite)
pub mod storage;

// HTTP API layer - REST endpoints for workflows, runs and webhooks
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use runtime::{ExecutionCoordinator, HandlerRegistry, NodeHandler, RunMode, RunResult, RunStatus};
pub use server::start_server;
pub use triggers::TriggerManager;
pub use workflow::{Edge, Node, Workflow};
