/// Webhook ingress
///
/// A single catch-all route hands every `/webhook/...` request to the
/// trigger manager, which owns the path index. Status codes:
/// - 404 when no trigger is registered at the path
/// - 405 / 401 when the trigger rejects the method / credentials
/// - 200 with the run output, or 422 when the run failed

use crate::{
    api::AppState,
    triggers::manager::{WebhookOutcome, WebhookRejection, WebhookRequest},
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::Json,
    routing::{any, Router},
};
use serde_json::{json, Value};
use std::collections::HashMap;

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/{*path}", any(execute_webhook))
}

/// Execute a workflow via webhook trigger
///
/// ANY /webhook/{path}
/// Body: JSON (or plain text) payload that becomes `input.body`
async fn execute_webhook(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> (StatusCode, Json<Value>) {
    tracing::info!("📥 Webhook request received: {} /{}", method, path);
    tracing::debug!("📄 Request body: {}", body);

    let body = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(Value::String(body))
    };
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();

    let outcome = state
        .triggers
        .execute_webhook(WebhookRequest {
            path,
            method: method.as_str().to_string(),
            headers,
            query,
            body,
        })
        .await;
    respond(outcome)
}

fn respond(outcome: WebhookOutcome) -> (StatusCode, Json<Value>) {
    match (&outcome.rejection, &outcome.result) {
        (Some(WebhookRejection::MethodNotAllowed), _) => (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(json!({ "error": outcome.error })),
        ),
        (Some(WebhookRejection::Unauthorized), _) => {
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": outcome.error })))
        }
        (None, _) if !outcome.triggered => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no webhook registered at this path" })),
        ),
        (None, Some(result)) if result.success => (
            StatusCode::OK,
            Json(json!({ "run_id": result.run_id, "output": result.output })),
        ),
        (None, Some(result)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "run_id": result.run_id,
                "status": result.status,
                "error": result.error,
                "failed_node": result.failed_node,
            })),
        ),
        (None, None) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": outcome.error })),
        ),
    }
}
