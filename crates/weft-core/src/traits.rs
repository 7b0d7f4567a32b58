use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{AgentOutput, NodeContext};

/// Agent-call executor: turns a resolved instruction into text output.
///
/// How the instruction is interpreted (an LLM reasoning loop, a scripted
/// responder, ...) is up to the implementation. Any `Err` fails the node.
pub trait AgentExecutor: Send + Sync + 'static {
    fn invoke(&self, instruction: String, ctx: NodeContext) -> BoxFuture<'_, Result<AgentOutput>>;
}

/// Tool-call executor: dispatches a named tool with resolved parameters.
///
/// Tool-not-found, remote errors and the like surface as node failures with
/// the message preserved.
pub trait ToolCaller: Send + Sync + 'static {
    fn call(&self, tool_name: &str, params: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>>;
}
