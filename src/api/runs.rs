/// Run endpoints
///
/// Manual execution, run history and cancellation.

use crate::{
    api::{ApiError, AppState},
    runtime::{executor::RunResult, ledger::{Run, RunMode}},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_RUN_LIMIT: usize = 20;
const MAX_RUN_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/run", post(run_workflow))
        .route("/api/workflows/{id}/runs", get(list_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
}

/// Run a workflow manually and wait for the result
///
/// POST /api/workflows/{id}/run
/// Body: optional JSON input for the start nodes
async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<RunResult>, ApiError> {
    let input = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid JSON input: {}", e)))?
    };

    tracing::info!("▶️ Manual run requested for workflow {}", id);
    let result = state.coordinator.run(&id, input, RunMode::Manual).await?;
    Ok(Json(result))
}

/// GET /api/workflows/{id}/runs?limit=N
async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);
    let runs = state.ledger.list_runs(&id, limit).await?;
    Ok(Json(json!({ "runs": runs })))
}

/// GET /api/runs/{id}
async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Run>, ApiError> {
    state
        .ledger
        .get_run(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("run '{}' not found", id)))
}

/// POST /api/runs/{id}/cancel
async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if state.coordinator.cancel(id).await {
        return Ok((StatusCode::ACCEPTED, Json(json!({ "cancelled": true }))));
    }
    match state.ledger.get_run(id).await? {
        Some(run) => Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("run '{}' already finished with status {}", id, run.status),
        )),
        None => Err(ApiError::not_found(format!("run '{}' not found", id))),
    }
}
