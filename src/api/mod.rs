/// HTTP API Layer
///
/// This module provides the REST API endpoints over the engine:
/// - Workflow CRUD, each write followed by a trigger refresh
/// - Manual runs, run lookup and cancellation
/// - Webhook ingress forwarding to the trigger manager

use crate::{
    runtime::{
        error::{ExecutionError, GraphError, LedgerError},
        executor::ExecutionCoordinator,
        ledger::ExecutionLedger,
    },
    triggers::{manager::TriggerManager, types::TriggerError},
    workflow::storage::{StoreError, WorkflowStore},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

// Workflow management endpoints (POST/GET/PUT/DELETE)
pub mod workflows;

// Manual runs, run lookup and cancellation
pub mod runs;

// Webhook ingress
pub mod webhooks;

// Re-export router builders
pub use runs::create_run_routes;
pub use webhooks::create_webhook_routes;
pub use workflows::create_workflow_routes;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn WorkflowStore>,
    pub ledger: Arc<dyn ExecutionLedger>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub triggers: TriggerManager,
}

/// Error response: status code plus `{ "error": message }`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!("🔥 Internal error: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::internal(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::internal(err)
    }
}

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::Conflict { .. } => Self::new(StatusCode::CONFLICT, err.to_string()),
            TriggerError::Store(e) => Self::internal(e),
            other => Self::new(StatusCode::UNPROCESSABLE_ENTITY, other.to_string()),
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::WorkflowNotFound(_) => Self::not_found(err.to_string()),
            ExecutionError::GraphInvalid(e) => e.into(),
            ExecutionError::Store(e) => Self::internal(e),
        }
    }
}
