//! Outbound HTTP request node
//!
//! Expected params:
//! `{ "url": "...", "method": "GET", "headers": {..}, "query": {..},
//!    "body": <json>, "credentialId": "api", "authType": "bearer",
//!    "failOnError": true, "timeoutMs": 30000 }`
//!
//! Without a `body` param, POST/PUT/PATCH send the node input as JSON.

use crate::runtime::error::HandlerError;
use crate::runtime::registry::{NodeContext, NodeHandler, Output};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

pub const HTTP_REQUEST: &str = "core.http_request";

pub struct HttpRequest;

#[async_trait]
impl NodeHandler for HttpRequest {
    fn required_parameters(&self) -> &'static [&'static str] {
        &["url"]
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Vec<Output>, HandlerError> {
        let url = ctx.require_str("url")?;
        let method_name = ctx.param_str("method").unwrap_or("GET").to_ascii_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| HandlerError::invalid("method", format!("unsupported HTTP method '{}'", method_name)))?;

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);
        let mut request = ctx.http.request(method.clone(), url);

        if let Some(headers) = ctx.param("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }
        if let Some(query) = ctx.param("query").and_then(Value::as_object) {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
                .collect();
            request = request.query(&pairs);
        }
        if let Some(timeout) = ctx.param("timeoutMs").and_then(Value::as_u64) {
            request = request.timeout(Duration::from_millis(timeout));
        }

        if let Some(credential_id) = ctx.param_str("credentialId") {
            let secret = ctx.credential(credential_id).await?;
            let field = |name: &str| {
                secret.get(name).cloned().ok_or_else(|| {
                    HandlerError::invalid("credentialId", format!("credential '{}' has no '{}' field", credential_id, name))
                })
            };
            request = match ctx.param_str("authType").unwrap_or("bearer") {
                "bearer" => request.bearer_auth(field("token")?),
                "basic" => request.basic_auth(field("username")?, Some(field("password")?)),
                "header" => {
                    let name = ctx
                        .param_str("headerName")
                        .map(str::to_string)
                        .map_or_else(|| field("name"), Ok)?;
                    request.header(name.as_str(), field("value")?)
                }
                other => {
                    return Err(HandlerError::invalid("authType", format!("unknown auth type '{}'", other)))
                }
            };
        }

        let body = match ctx.param("body") {
            Some(body) => Some(body.clone()),
            None if matches!(method, Method::POST | Method::PUT | Method::PATCH) => Some(ctx.input.clone()),
            None => None,
        };
        request = match body {
            Some(Value::String(text)) => request.header("Content-Type", "text/plain").body(text),
            Some(Value::Null) | None => request,
            Some(json_body) => request.json(&json_body),
        };

        let response = request
            .send()
            .await
            .map_err(|e| HandlerError::failed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| HandlerError::failed(format!("Failed to read response body: {}", e)))?;
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        tracing::info!("📡 HTTP {} {} -> {}", method, url, status);
        if !status.is_success() && ctx.param_bool("failOnError", true) {
            return Err(HandlerError::failed(format!("HTTP {} {} returned {}", method, url, status)));
        }

        Ok(vec![Output::main(json!({
            "status": status.as_u16(),
            "headers": headers,
            "data": data,
            "success": status.is_success(),
        }))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_context;
    use axum::{http::HeaderMap, routing::any, Json, Router};

    /// Echo server answering with the request's method, auth header and body
    async fn echo_server() -> String {
        async fn echo(method: axum::http::Method, headers: HeaderMap, body: String) -> (axum::http::StatusCode, Json<Value>) {
            let status = if headers.contains_key("x-fail") {
                axum::http::StatusCode::BAD_GATEWAY
            } else {
                axum::http::StatusCode::OK
            };
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            (status, Json(json!({"method": method.as_str(), "auth": auth, "body": body})))
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/echo", any(echo))).await.unwrap();
        });
        format!("http://{}/echo", addr)
    }

    #[tokio::test]
    async fn posts_input_with_bearer_credential() {
        let url = echo_server().await;
        let ctx = test_context(
            HTTP_REQUEST,
            json!({"url": url, "method": "post", "credentialId": "api"}),
            json!({"hello": "world"}),
        );

        let out = HttpRequest.execute(&ctx).await.unwrap();
        let data = &out[0].data;
        assert_eq!(data["status"], 200);
        assert_eq!(data["data"]["method"], "POST");
        assert_eq!(data["data"]["auth"], "Bearer t0ken");
        assert_eq!(data["data"]["body"], r#"{"hello":"world"}"#);
    }

    #[tokio::test]
    async fn error_status_fails_unless_disabled() {
        let url = echo_server().await;
        let params = json!({"url": url, "headers": {"x-fail": "1"}});
        let ctx = test_context(HTTP_REQUEST, params.clone(), Value::Null);
        assert!(matches!(HttpRequest.execute(&ctx).await, Err(HandlerError::Failed(_))));

        let mut relaxed = params;
        relaxed["failOnError"] = json!(false);
        let ctx = test_context(HTTP_REQUEST, relaxed, Value::Null);
        let out = HttpRequest.execute(&ctx).await.unwrap();
        assert_eq!(out[0].data["status"], 502);
        assert_eq!(out[0].data["success"], false);
    }

    #[tokio::test]
    async fn unknown_credentials_are_reported() {
        let ctx = test_context(
            HTTP_REQUEST,
            json!({"url": "http://127.0.0.1:9/", "credentialId": "missing"}),
            Value::Null,
        );
        assert!(matches!(HttpRequest.execute(&ctx).await, Err(HandlerError::Credential(_))));
    }
}
