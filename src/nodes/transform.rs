//! JSON shaping nodes

use crate::runtime::error::HandlerError;
use crate::runtime::registry::{NodeContext, NodeHandler, Output};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub const NOOP: &str = "core.noop";
pub const SET: &str = "core.set";
pub const EXTRACT: &str = "core.extract";

/// Passes its input through unchanged
pub struct Noop;

#[async_trait]
impl NodeHandler for Noop {
    async fn execute(&self, ctx: &NodeContext) -> Result<Vec<Output>, HandlerError> {
        Ok(vec![Output::main(ctx.input.clone())])
    }
}

/// Writes fixed fields onto the input object
///
/// Params: `{ "values": { ... }, "keepInput": true }`. With `keepInput`
/// false, or a non-object input, the output holds only `values`.
pub struct Set;

#[async_trait]
impl NodeHandler for Set {
    fn required_parameters(&self) -> &'static [&'static str] {
        &["values"]
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Vec<Output>, HandlerError> {
        let values = ctx
            .param("values")
            .and_then(Value::as_object)
            .ok_or_else(|| HandlerError::invalid("values", "expected an object"))?;

        let mut output = match (&ctx.input, ctx.param_bool("keepInput", true)) {
            (Value::Object(input), true) => input.clone(),
            _ => Map::new(),
        };
        for (key, value) in values {
            output.insert(key.clone(), value.clone());
        }

        tracing::debug!("✏️ Set {} fields on node '{}'", values.len(), ctx.node_id);
        Ok(vec![Output::main(Value::Object(output))])
    }
}

/// Selects part of the input with a JSONPath expression
///
/// Params: `{ "path": "$.items[*].id", "single": false }`. Emits every match
/// as an array, or with `single` only the first match (`null` if none).
pub struct Extract;

#[async_trait]
impl NodeHandler for Extract {
    fn required_parameters(&self) -> &'static [&'static str] {
        &["path"]
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Vec<Output>, HandlerError> {
        let path = ctx.require_str("path")?;
        let matches = jsonpath_lib::select(&ctx.input, path)
            .map_err(|e| HandlerError::invalid("path", format!("{:?}", e)))?;

        tracing::debug!("🔎 JSONPath '{}' matched {} values", path, matches.len());
        let data = if ctx.param_bool("single", false) {
            matches.first().map(|v| (*v).clone()).unwrap_or(Value::Null)
        } else {
            Value::Array(matches.into_iter().cloned().collect())
        };
        Ok(vec![Output::main(data)])
    }
}
