//! Lua code node
//!
//! Runs a user script in a fresh Lua state on the blocking pool. The node
//! input is available as the global `input`, node parameters as `params`,
//! and whatever the script returns becomes the `main` output.

use crate::runtime::error::HandlerError;
use crate::runtime::registry::{NodeContext, NodeHandler, Output};
use async_trait::async_trait;
use mlua::{Lua, LuaSerdeExt};
use serde_json::{Map, Value};

pub const CODE: &str = "core.code";

/// Globals removed before user code runs
const BLOCKED_GLOBALS: &[&str] = &[
    "os", "io", "debug", "package", "require", "dofile", "loadfile", "load", "collectgarbage",
];

pub struct LuaCode;

#[async_trait]
impl NodeHandler for LuaCode {
    fn required_parameters(&self) -> &'static [&'static str] {
        &["script"]
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Vec<Output>, HandlerError> {
        let script = ctx.require_str("script")?.to_string();
        let input = ctx.input.clone();
        let params = ctx.parameters.clone();
        tracing::debug!("🧠 Running Lua script for node '{}'", ctx.node_id);

        let result = tokio::task::spawn_blocking(move || run_script(&script, input, params))
            .await
            .map_err(|e| HandlerError::failed(format!("Lua worker failed: {}", e)))??;
        Ok(vec![Output::main(result)])
    }
}

fn run_script(script: &str, input: Value, params: Map<String, Value>) -> Result<Value, HandlerError> {
    let lua = Lua::new();
    let lua_err = |stage: &str, e: mlua::Error| HandlerError::failed(format!("Lua {}: {}", stage, e));

    let globals = lua.globals();
    for name in BLOCKED_GLOBALS {
        globals.set(*name, mlua::Nil).map_err(|e| lua_err("setup", e))?;
    }

    let now = lua
        .create_function(|_, ()| Ok(chrono::Utc::now().to_rfc3339()))
        .map_err(|e| lua_err("setup", e))?;
    globals.set("now", now).map_err(|e| lua_err("setup", e))?;
    globals
        .set("input", lua.to_value(&input).map_err(|e| lua_err("input conversion", e))?)
        .map_err(|e| lua_err("setup", e))?;
    globals
        .set("params", lua.to_value(&params).map_err(|e| lua_err("params conversion", e))?)
        .map_err(|e| lua_err("setup", e))?;

    let returned: mlua::Value = lua
        .load(script)
        .set_name("node script")
        .eval()
        .map_err(|e| lua_err("script error", e))?;
    lua.from_value(returned)
        .map_err(|e| lua_err("output conversion", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_context;
    use serde_json::json;

    #[tokio::test]
    async fn script_reads_input_and_returns_json() {
        let ctx = test_context(
            CODE,
            json!({"script": "return { doubled = input.score * 2, name = input.name }"}),
            json!({"score": 21, "name": "ada"}),
        );
        let out = LuaCode.execute(&ctx).await.unwrap();
        assert_eq!(out[0].data, json!({"doubled": 42, "name": "ada"}));
    }

    #[tokio::test]
    async fn script_errors_are_handler_failures() {
        let ctx = test_context(CODE, json!({"script": "error('nope')"}), json!({}));
        let err = LuaCode.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed(ref m) if m.contains("nope")));
    }

    #[tokio::test]
    async fn os_library_is_unavailable() {
        let ctx = test_context(CODE, json!({"script": "return os.time()"}), json!({}));
        assert!(LuaCode.execute(&ctx).await.is_err());
    }
}
