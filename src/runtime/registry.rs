//! Node handler registry
//!
//! Maps a node's type string to the handler that executes it. The map sits
//! behind an `ArcSwap` so lookups during execution never take a lock, while
//! registration (normally at startup) swaps in a new map atomically.

use crate::credentials::{CredentialResolver, SecretMap};
use crate::runtime::error::{HandlerError, NodeError};
use crate::workflow::types::MAIN_PORT;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::HashMap, fmt, sync::Arc};
use uuid::Uuid;

/// One piece of node output, emitted on a named output port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub port: String,
    pub data: Value,
}

impl Output {
    /// Output on the `main` port
    pub fn main(data: Value) -> Self {
        Self {
            port: MAIN_PORT.to_string(),
            data,
        }
    }

    /// Output on an explicit port
    pub fn on(port: impl Into<String>, data: Value) -> Self {
        Self {
            port: port.into(),
            data,
        }
    }
}

/// Value carried by `port` given a handler's outputs
///
/// A single output on the port yields its data, several yield an array of
/// their data, none yields `null`.
pub fn port_value(outputs: &[Output], port: &str) -> Value {
    let mut matching: Vec<&Value> = outputs
        .iter()
        .filter(|o| o.port == port)
        .map(|o| &o.data)
        .collect();
    match matching.len() {
        0 => Value::Null,
        1 => matching.remove(0).clone(),
        _ => Value::Array(matching.into_iter().cloned().collect()),
    }
}

/// Port -> data snapshot of a handler's outputs
pub fn output_snapshot(outputs: &[Output]) -> Value {
    let mut snapshot = Map::new();
    for output in outputs {
        if !snapshot.contains_key(&output.port) {
            snapshot.insert(output.port.clone(), port_value(outputs, &output.port));
        }
    }
    Value::Object(snapshot)
}

/// Everything a handler may use while executing one node
///
/// Handlers never reach for global state: secrets come through `credentials`
/// and outbound HTTP goes through the shared `http` client.
#[derive(Clone)]
pub struct NodeContext {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub node_id: String,
    pub node_type: String,
    pub parameters: Map<String, Value>,
    /// Merged input data (see `ExecutionCoordinator` for the merge rules)
    pub input: Value,
    pub credentials: Arc<dyn CredentialResolver>,
    pub http: reqwest::Client,
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("run_id", &self.run_id)
            .field("workflow_id", &self.workflow_id)
            .field("node_id", &self.node_id)
            .field("node_type", &self.node_type)
            .field("parameters", &self.parameters)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl NodeContext {
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.parameters
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// String parameter that must be present
    pub fn require_str(&self, key: &str) -> Result<&str, HandlerError> {
        match self.parameters.get(key) {
            None | Some(Value::Null) => Err(HandlerError::MissingParameter(key.to_string())),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(HandlerError::invalid(key, "expected a string")),
        }
    }

    /// Resolve a credential through the run's resolver
    pub async fn credential(&self, credential_id: &str) -> Result<SecretMap, HandlerError> {
        Ok(self.credentials.resolve(credential_id).await?)
    }
}

/// Contract every node type implements
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Parameters checked by the coordinator before the first invocation
    fn required_parameters(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Vec<Output>, HandlerError>;
}

/// Lock-free registry of node handlers keyed by exact type string
pub struct HandlerRegistry {
    handlers: ArcSwap<HashMap<String, Arc<dyn NodeHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Register (or replace) the handler for `node_type`
    pub fn register(&self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        let node_type = node_type.into();
        let previous = self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(node_type.clone(), Arc::clone(&handler));
            next
        });
        if previous.contains_key(&node_type) {
            tracing::warn!("♻️ Replaced handler for node type '{}'", node_type);
        } else {
            tracing::debug!("➕ Registered handler for node type '{}'", node_type);
        }
    }

    /// Look up the handler for `node_type`
    pub fn resolve(&self, node_type: &str) -> Result<Arc<dyn NodeHandler>, NodeError> {
        self.handlers
            .load()
            .get(node_type)
            .cloned()
            .ok_or_else(|| NodeError::HandlerNotFound(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.load().contains_key(node_type)
    }

    /// Registered node types, sorted
    pub fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.load().keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl NodeHandler for Echo {
        async fn execute(&self, ctx: &NodeContext) -> Result<Vec<Output>, HandlerError> {
            Ok(vec![Output::main(ctx.input.clone())])
        }
    }

    #[test]
    fn lookup_is_exact_match() {
        let registry = HandlerRegistry::new();
        registry.register("core.echo", Arc::new(Echo));

        assert!(registry.resolve("core.echo").is_ok());
        assert!(matches!(
            registry.resolve("core.echo@1"),
            Err(NodeError::HandlerNotFound(t)) if t == "core.echo@1"
        ));
        assert!(registry.resolve("core.*").is_err());
        assert_eq!(registry.node_types(), vec!["core.echo"]);
    }

    #[test]
    fn port_values_group_by_port() {
        let outputs = vec![
            Output::main(json!(1)),
            Output::on("errors", json!("x")),
            Output::main(json!(2)),
        ];
        assert_eq!(port_value(&outputs, "main"), json!([1, 2]));
        assert_eq!(port_value(&outputs, "errors"), json!("x"));
        assert_eq!(port_value(&outputs, "missing"), Value::Null);
        assert_eq!(
            output_snapshot(&outputs),
            json!({"main": [1, 2], "errors": "x"})
        );
    }
}
