use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use nodeflow::{
    config::{Config, CredentialsConfig, DatabaseConfig, ExecutionConfig, ServerConfig},
    server::{build_router, create_state},
};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app() -> Router {
    let config = Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        database: DatabaseConfig { url: "memory".into() },
        execution: ExecutionConfig {
            ledger_write_attempts: 1,
            event_buffer: 64,
        },
        credentials: CredentialsConfig::default(),
    };
    build_router(create_state(&config).await.unwrap())
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    call_with(app, Request::builder().method(method).uri(uri), body).await
}

async fn call_with(
    app: &Router,
    request: axum::http::request::Builder,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)));
    (status, value)
}

fn order_workflow(auth: Value) -> Value {
    json!({
        "workflow": {
            "id": "orders",
            "name": "Orders",
            "nodes": [
                { "id": "hook", "type": "trigger.webhook",
                  "parameters": { "path": "/orders", "method": "POST", "auth": auth } },
                { "id": "tag", "type": "core.set",
                  "parameters": { "values": { "status": "accepted" } } }
            ],
            "edges": [ { "id": "e1", "source": "hook", "target": "tag" } ]
        }
    })
}

#[tokio::test]
async fn health_check_answers_ok() {
    let app = app().await;
    let (status, body) = call(&app, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn webhook_workflow_lifecycle() {
    let app = app().await;

    let (status, _) = call(&app, Method::POST, "/api/workflows", Some(order_workflow(Value::Null))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(&app, Method::POST, "/api/workflows", Some(order_workflow(Value::Null))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&app, Method::GET, "/api/workflows/orders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["triggers"]["webhooks"][0]["path"], json!("/orders"));

    let (status, body) = call(&app, Method::POST, "/webhook/orders", Some(json!({"id": 7}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"]["tag"]["main"]["status"], json!("accepted"));
    assert_eq!(body["output"]["tag"]["main"]["body"]["id"], json!(7));

    let (status, _) = call(&app, Method::GET, "/webhook/orders", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    let (status, _) = call(&app, Method::POST, "/webhook/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, Method::DELETE, "/api/workflows/orders", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::POST, "/webhook/orders", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::DELETE, "/api/workflows/orders", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn header_auth_guards_the_webhook() {
    let app = app().await;
    let auth = json!({"mode": "header", "name": "X-Api-Key", "value": "s3cret"});
    let (status, _) = call(&app, Method::POST, "/api/workflows", Some(order_workflow(auth))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(&app, Method::POST, "/webhook/orders", Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhook/orders")
        .header("x-api-key", "s3cret");
    let (status, _) = call_with(&app, request, Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn invalid_graphs_are_rejected() {
    let app = app().await;
    let cyclic = json!({
        "workflow": {
            "id": "loop",
            "name": "Loop",
            "nodes": [
                { "id": "a", "type": "core.noop" },
                { "id": "b", "type": "core.noop" }
            ],
            "edges": [
                { "id": "e1", "source": "a", "target": "b" },
                { "id": "e2", "source": "b", "target": "a" }
            ]
        }
    });
    let (status, body) = call(&app, Method::POST, "/api/workflows", Some(cyclic)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string());

    let (status, _) = call(&app, Method::GET, "/api/workflows/loop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let bad_cron = json!({
        "workflow": {
            "id": "tick",
            "name": "Tick",
            "nodes": [ { "id": "t", "type": "trigger.schedule", "parameters": { "cron": "every day" } } ]
        }
    });
    let (status, _) = call(&app, Method::POST, "/api/workflows", Some(bad_cron)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn manual_runs_are_recorded_and_queryable() {
    let app = app().await;
    let workflow = json!({
        "workflow": {
            "id": "echo",
            "name": "Echo",
            "nodes": [
                { "id": "start", "type": "trigger.manual" },
                { "id": "code", "type": "core.code",
                  "parameters": { "script": "return { greeting = 'hi ' .. input.name }" } }
            ],
            "edges": [ { "id": "e1", "source": "start", "target": "code" } ]
        }
    });
    let (status, _) = call(&app, Method::POST, "/api/workflows", Some(workflow)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, result) = call(&app, Method::POST, "/api/workflows/echo/run", Some(json!({"name": "ada"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["success"], json!(true));
    assert_eq!(result["output"]["code"]["main"]["greeting"], json!("hi ada"));
    let run_id = result["run_id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, Method::GET, "/api/workflows/echo/runs?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["runs"].as_array().unwrap().len(), 1);

    let (status, run) = call(&app, Method::GET, &format!("/api/runs/{}", run_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], json!("completed"));

    let (status, _) = call(&app, Method::POST, &format!("/api/runs/{}/cancel", run_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/runs/00000000-0000-0000-0000-000000000000/cancel",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, Method::POST, "/api/workflows/missing/run", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
