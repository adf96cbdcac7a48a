//! Trigger entry nodes
//!
//! The trigger itself lives in `crate::triggers`; inside a run these nodes
//! only hand the run input to their dependents.

use crate::runtime::error::HandlerError;
use crate::runtime::registry::{NodeContext, NodeHandler, Output};
use async_trait::async_trait;

pub const MANUAL: &str = "trigger.manual";
pub const WEBHOOK: &str = "trigger.webhook";
pub const SCHEDULE: &str = "trigger.schedule";

pub struct TriggerPassthrough;

#[async_trait]
impl NodeHandler for TriggerPassthrough {
    async fn execute(&self, ctx: &NodeContext) -> Result<Vec<Output>, HandlerError> {
        tracing::debug!("🎬 Trigger node '{}' ({}) started the run", ctx.node_id, ctx.node_type);
        Ok(vec![Output::main(ctx.input.clone())])
    }
}
