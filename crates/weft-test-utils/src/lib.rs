//! Mock executors and template fixtures shared by Weft tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::time::Instant;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{AgentExecutor, ToolCaller};
use weft_core::types::{AgentOutput, NodeContext};

// ── Agents ──────────────────────────────────────────────────────

/// One recorded agent invocation.
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub workflow_name: String,
    pub node_id: String,
    pub instruction: String,
    pub recursion_depth: usize,
}

#[derive(Debug, Clone)]
enum Reply {
    Output(AgentOutput),
    Fail(String),
}

/// Agent with per-node scripted replies.
///
/// Replies for a node are consumed in order and the last one repeats.
/// Nodes without a script echo their instruction.
#[derive(Default)]
pub struct ScriptedAgent {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    counters: HashMap<String, String>,
    calls: Mutex<Vec<AgentCall>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `node_id`.
    pub fn reply(self, node_id: &str, output: AgentOutput) -> Self {
        self.push(node_id, Reply::Output(output))
    }

    pub fn reply_text(self, node_id: &str, text: &str) -> Self {
        self.reply(node_id, AgentOutput::text(text))
    }

    /// Queue a failure for `node_id`.
    pub fn fail(self, node_id: &str, message: &str) -> Self {
        self.push(node_id, Reply::Fail(message.to_string()))
    }

    /// Report the node's call count (1-based) as metadata field `field`.
    pub fn count_into(mut self, node_id: &str, field: &str) -> Self {
        self.counters.insert(node_id.to_string(), field.to_string());
        self
    }

    fn push(self, node_id: &str, reply: Reply) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(node_id.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Instructions received by `node_id`, in call order.
    pub fn instructions(&self, node_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.node_id == node_id)
            .map(|c| c.instruction.clone())
            .collect()
    }

    pub fn call_count(&self, node_id: &str) -> usize {
        self.instructions(node_id).len()
    }

    fn next_reply(&self, node_id: &str) -> Option<Reply> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(node_id)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl AgentExecutor for ScriptedAgent {
    fn invoke(&self, instruction: String, ctx: NodeContext) -> BoxFuture<'_, Result<AgentOutput>> {
        Box::pin(async move {
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(AgentCall {
                    workflow_name: ctx.workflow_name.clone(),
                    node_id: ctx.node_id.clone(),
                    instruction: instruction.clone(),
                    recursion_depth: ctx.recursion_depth,
                });
                calls.iter().filter(|c| c.node_id == ctx.node_id).count()
            };

            let mut output = match self.next_reply(&ctx.node_id) {
                Some(Reply::Output(out)) => out,
                Some(Reply::Fail(message)) => return Err(WeftError::Agent(message)),
                None => AgentOutput::text(instruction),
            };
            if let Some(field) = self.counters.get(&ctx.node_id) {
                output.metadata.insert(field.clone(), json!(count));
            }
            Ok(output)
        })
    }
}

/// Start/finish instants of one agent call.
#[derive(Debug, Clone)]
pub struct Span {
    pub node_id: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Echo agent that sleeps a per-node delay and records when each call ran.
#[derive(Default)]
pub struct RecordingAgent {
    delays: HashMap<String, Duration>,
    spans: Mutex<Vec<Span>>,
}

impl RecordingAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, node_id: &str, delay: Duration) -> Self {
        self.delays.insert(node_id.to_string(), delay);
        self
    }

    pub fn spans(&self) -> Vec<Span> {
        self.spans.lock().unwrap().clone()
    }

    /// Latest span recorded for `node_id`.
    pub fn span(&self, node_id: &str) -> Option<Span> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.node_id == node_id)
            .cloned()
    }
}

impl AgentExecutor for RecordingAgent {
    fn invoke(&self, instruction: String, ctx: NodeContext) -> BoxFuture<'_, Result<AgentOutput>> {
        Box::pin(async move {
            let started = Instant::now();
            if let Some(delay) = self.delays.get(&ctx.node_id) {
                tokio::time::sleep(*delay).await;
            }
            self.spans.lock().unwrap().push(Span {
                node_id: ctx.node_id,
                started,
                finished: Instant::now(),
            });
            Ok(AgentOutput::text(instruction))
        })
    }
}

/// Echo agent that always takes `delay` to answer.
pub struct SlowAgent {
    pub delay: Duration,
}

impl SlowAgent {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl AgentExecutor for SlowAgent {
    fn invoke(&self, instruction: String, _ctx: NodeContext) -> BoxFuture<'_, Result<AgentOutput>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(AgentOutput::text(instruction))
        })
    }
}

// ── Tools ───────────────────────────────────────────────────────

/// Tool caller that fails every call with `message`.
pub struct FailingTool {
    pub message: String,
}

impl FailingTool {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl ToolCaller for FailingTool {
    fn call(&self, tool_name: &str, _params: Value) -> BoxFuture<'_, Result<Value>> {
        let err = WeftError::ToolExecution {
            tool: tool_name.to_string(),
            message: self.message.clone(),
        };
        Box::pin(async move { Err(err) })
    }
}

/// Tool caller that records resolved params and returns them unchanged.
#[derive(Default)]
pub struct RecordingTool {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolCaller for RecordingTool {
    fn call(&self, tool_name: &str, params: Value) -> BoxFuture<'_, Result<Value>> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), params.clone()));
        Box::pin(async move { Ok(params) })
    }
}

// ── Template fixtures ───────────────────────────────────────────

pub fn agent_node(id: &str, instruction: &str, depends_on: &[&str]) -> Value {
    json!({"id": id, "kind": "agent", "instruction": instruction, "depends_on": depends_on})
}

pub fn grouped_agent(id: &str, instruction: &str, depends_on: &[&str], group: &str) -> Value {
    json!({
        "id": id,
        "kind": "agent",
        "instruction": instruction,
        "depends_on": depends_on,
        "parallel_group": group
    })
}

pub fn tool_node(id: &str, tool_name: &str, params: Value, depends_on: &[&str]) -> Value {
    json!({"id": id, "kind": "tool", "tool_name": tool_name, "params": params, "depends_on": depends_on})
}

pub fn workflow_node(id: &str, workflow_name: &str, workflow_params: Value, depends_on: &[&str]) -> Value {
    json!({
        "id": id,
        "kind": "workflow",
        "workflow_name": workflow_name,
        "workflow_params": workflow_params,
        "depends_on": depends_on
    })
}

/// `{"field": .., "operator": .., "value": .., "next_node": ..}`
pub fn condition(field: &str, operator: &str, value: Value, next_node: &str) -> Value {
    json!({"field": field, "operator": operator, "value": value, "next_node": next_node})
}

pub fn edge(from_node: &str, conditions: Vec<Value>, default: &str) -> Value {
    json!({"from_node": from_node, "conditions": conditions, "default": default})
}

pub fn template(name: &str, nodes: Vec<Value>, edges: Vec<Value>) -> Value {
    json!({"name": name, "version": "1.0", "nodes": nodes, "conditional_edges": edges})
}

/// Write a template as `<dir>/<file>`, JSON-encoded.
pub fn write_template(dir: &Path, file: &str, template: &Value) -> PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, serde_json::to_string_pretty(template).unwrap()).unwrap();
    path
}

/// A temporary directory holding the given templates as `<name>.json`.
pub fn template_dir(templates: &[Value]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for t in templates {
        let name = t["name"].as_str().unwrap_or("template");
        write_template(dir.path(), &format!("{}.json", name), t);
    }
    dir
}
