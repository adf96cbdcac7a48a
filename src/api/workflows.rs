/// Workflow management REST API endpoints
///
/// Provides CRUD operations for workflow definitions. Every write validates
/// the graph first, then hands the workflow to the trigger manager, which
/// persists it and re-derives its triggers under one lock.

use crate::{
    api::{ApiError, AppState},
    runtime::resolver,
    workflow::types::Workflow,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub workflow: Workflow,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
}

/// Validate the graph, then persist and refresh triggers atomically
async fn write_workflow(state: &AppState, workflow: &Workflow) -> Result<(), ApiError> {
    resolver::resolve(workflow)?;
    state.triggers.save_workflow(workflow).await?;
    Ok(())
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...], "edges": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<WorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResponse>), ApiError> {
    let workflow = payload.workflow;
    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(ApiError::bad_request("workflow id and name are required"));
    }
    if state.store.get_workflow(&workflow.id).await?.is_some() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("workflow '{}' already exists", workflow.id),
        ));
    }

    write_workflow(&state, &workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            id: workflow.id.clone(),
            message: format!("Workflow '{}' created successfully", workflow.name),
        }),
    ))
}

/// List all workflows
///
/// GET /api/workflows
/// Returns: { "workflows": [{ "id", "name", "created_at", "updated_at" }] }
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state.store.list_workflows().await?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// Get a specific workflow with its active triggers
///
/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let workflow = state
        .store
        .get_workflow(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("workflow '{}' not found", id)))?;
    let webhooks = state.triggers.webhooks_of(&id).await;
    let schedule = state.triggers.schedule_for(&id).await;
    let running = state.coordinator.is_running(&id).await;

    Ok(Json(json!({
        "workflow": workflow,
        "triggers": { "webhooks": webhooks, "schedule": schedule },
        "running": running,
    })))
}

/// Update an existing workflow
///
/// PUT /api/workflows/{id}
/// Body: { "workflow": { ... } } (the id is taken from the URL)
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<WorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();
    if workflow.name.is_empty() {
        return Err(ApiError::bad_request("workflow name is required"));
    }
    if state.store.get_workflow(&id).await?.is_none() {
        return Err(ApiError::not_found(format!("workflow '{}' not found", id)));
    }

    write_workflow(&state, &workflow).await?;
    tracing::info!("🔥 Updated workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' updated successfully", workflow.name),
    }))
}

/// Delete a workflow and deactivate its triggers
///
/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.triggers.delete_workflow(&id).await? {
        return Err(ApiError::not_found(format!("workflow '{}' not found", id)));
    }
    tracing::info!("🗑️ Deleted workflow: {}", id);
    Ok(Json(json!({ "message": "Workflow deleted successfully" })))
}
