/// Built-in node handlers
///
/// Every handler here is registered at startup by [`register_builtin`]:
/// - `trigger.*`: entry points that pass the run input through
/// - `core.noop`, `core.set`, `core.extract`: JSON shaping
/// - `core.code`: embedded Lua scripts
/// - `core.http_request`: outbound HTTP with credential injection

pub mod code;
pub mod http;
pub mod transform;
pub mod trigger;

use crate::runtime::registry::HandlerRegistry;
use std::sync::Arc;

/// Register all built-in handlers
pub fn register_builtin(registry: &HandlerRegistry) {
    registry.register(trigger::MANUAL, Arc::new(trigger::TriggerPassthrough));
    registry.register(trigger::WEBHOOK, Arc::new(trigger::TriggerPassthrough));
    registry.register(trigger::SCHEDULE, Arc::new(trigger::TriggerPassthrough));
    registry.register(transform::NOOP, Arc::new(transform::Noop));
    registry.register(transform::SET, Arc::new(transform::Set));
    registry.register(transform::EXTRACT, Arc::new(transform::Extract));
    registry.register(code::CODE, Arc::new(code::LuaCode));
    registry.register(http::HTTP_REQUEST, Arc::new(http::HttpRequest));
    tracing::info!("🧩 Registered {} built-in node types", registry.node_types().len());
}

#[cfg(test)]
pub(crate) fn test_context(
    node_type: &str,
    parameters: serde_json::Value,
    input: serde_json::Value,
) -> crate::runtime::registry::NodeContext {
    use crate::credentials::StaticCredentials;

    crate::runtime::registry::NodeContext {
        run_id: uuid::Uuid::new_v4(),
        workflow_id: "wf".to_string(),
        node_id: "node".to_string(),
        node_type: node_type.to_string(),
        parameters: parameters.as_object().cloned().unwrap_or_default(),
        input,
        credentials: Arc::new(
            StaticCredentials::new()
                .with("api", [("token", "t0ken")])
                .with("login", [("username", "bot"), ("password", "pw")]),
        ),
        http: reqwest::Client::new(),
    }
}
