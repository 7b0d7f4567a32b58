//! Trivial executors for dry runs: they echo what they were asked to do.

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use weft_core::error::Result;
use weft_core::traits::{AgentExecutor, ToolCaller};
use weft_core::types::{AgentOutput, NodeContext};

/// Returns the resolved instruction as the node output.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAgent;

impl AgentExecutor for EchoAgent {
    fn invoke(&self, instruction: String, ctx: NodeContext) -> BoxFuture<'_, Result<AgentOutput>> {
        Box::pin(async move {
            debug!(workflow = %ctx.workflow_name, node_id = %ctx.node_id, "Echo agent");
            Ok(AgentOutput::text(instruction))
        })
    }
}

/// Returns `{"tool": <name>, "params": <resolved params>}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

impl ToolCaller for EchoTool {
    fn call(&self, tool_name: &str, params: Value) -> BoxFuture<'_, Result<Value>> {
        let out = json!({ "tool": tool_name, "params": params });
        Box::pin(async move { Ok(out) })
    }
}
