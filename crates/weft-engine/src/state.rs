use std::collections::HashSet;

use serde_json::{Map, Value};

use weft_core::types::Params;

/// Mutable state of one workflow invocation.
///
/// Owned by the invocation that created it. A sub-workflow gets a fresh
/// state of its own; nothing here is shared with the parent.
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    pub workflow_name: String,
    pub user_input: String,
    /// Caller parameters merged over template defaults.
    pub params: Params,
    /// Latest output per node id.
    pub node_outputs: Map<String, Value>,
    /// Attempted node ids in order; loops append repeats.
    pub completed_nodes: Vec<String>,
    /// Values conditional edges route on.
    pub custom_metadata: Map<String, Value>,
    /// Names of the workflows currently executing above this one.
    pub parent_workflow_stack: Vec<String>,
    pub recursion_depth: usize,
    failed: HashSet<String>,
}

impl ExecutionState {
    pub fn new(workflow_name: impl Into<String>, user_input: impl Into<String>, params: Params) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            user_input: user_input.into(),
            params,
            ..Default::default()
        }
    }

    /// Set the call-stack position of this invocation.
    pub fn nested(mut self, parent_workflow_stack: Vec<String>, recursion_depth: usize) -> Self {
        self.parent_workflow_stack = parent_workflow_stack;
        self.recursion_depth = recursion_depth;
        self
    }

    /// Record a successful attempt.
    pub fn record_success(&mut self, node_id: &str, output: Value) {
        self.node_outputs.insert(node_id.to_string(), output);
        self.completed_nodes.push(node_id.to_string());
        self.failed.remove(node_id);
        self.custom_metadata.insert("has_error".into(), Value::Bool(false));
        self.custom_metadata.remove("error");

        let mut status = Map::new();
        status.insert("has_error".into(), Value::Bool(false));
        self.custom_metadata.insert(node_id.to_string(), Value::Object(status));
    }

    /// Record a failed attempt. The previous output, if any, is kept.
    pub fn record_failure(&mut self, node_id: &str, error: &str) {
        self.completed_nodes.push(node_id.to_string());
        self.custom_metadata
            .insert(node_id.to_string(), Value::Object(Map::new()));
        self.mark_failed(node_id, error);
    }

    /// Turn the latest attempt of a node into a failure without recording
    /// a new attempt.
    ///
    /// The top-level `has_error`/`error` pair reflects whichever attempt was
    /// applied last, so inside a parallel group it is the last member in
    /// declaration order. `<node_id>.has_error` is always that node's own.
    pub fn mark_failed(&mut self, node_id: &str, error: &str) {
        self.failed.insert(node_id.to_string());
        self.custom_metadata.insert("has_error".into(), Value::Bool(true));
        self.custom_metadata.insert("error".into(), Value::String(error.to_string()));

        let status = self.node_metadata(node_id);
        status.insert("has_error".into(), Value::Bool(true));
        status.insert("error".into(), Value::String(error.to_string()));
    }

    /// Merge metadata reported by an executor. Keys land at the top level
    /// and in the object kept under the node id.
    pub fn merge_metadata(&mut self, node_id: &str, metadata: &Map<String, Value>) {
        if metadata.is_empty() {
            return;
        }
        for (key, value) in metadata {
            self.custom_metadata.insert(key.clone(), value.clone());
        }
        self.node_metadata(node_id)
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Per-node metadata object, created (or replacing a non-object) on demand.
    fn node_metadata(&mut self, node_id: &str) -> &mut Map<String, Value> {
        let entry = self
            .custom_metadata
            .entry(node_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            _ => unreachable!("replaced with an object above"),
        }
    }

    /// True when the node's latest attempt succeeded.
    pub fn is_satisfied(&self, node_id: &str) -> bool {
        self.node_outputs.contains_key(node_id) && !self.failed.contains(node_id)
    }

    pub fn has_attempted(&self, node_id: &str) -> bool {
        self.completed_nodes.iter().any(|n| n == node_id)
    }

    /// First dependency of `depends_on` that is not satisfied.
    pub fn first_unmet<'a>(&self, depends_on: &'a [String]) -> Option<&'a str> {
        depends_on
            .iter()
            .find(|dep| !self.is_satisfied(dep))
            .map(|s| s.as_str())
    }

    /// Whether `workflow` is already executing above this invocation.
    pub fn in_call_stack(&self, workflow: &str) -> bool {
        self.workflow_name == workflow || self.parent_workflow_stack.iter().any(|w| w == workflow)
    }

    /// Stack to hand to a child invocation: ours plus this workflow.
    pub fn child_stack(&self) -> Vec<String> {
        let mut stack = self.parent_workflow_stack.clone();
        stack.push(self.workflow_name.clone());
        stack
    }
}
