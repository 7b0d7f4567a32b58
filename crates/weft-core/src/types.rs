use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkflowError;

/// Unique identifier of one workflow invocation.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The capability a node exercises when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKindTag {
    Agent,
    Tool,
    Workflow,
}

impl NodeKindTag {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" => Some(Self::Agent),
            "tool" => Some(Self::Tool),
            "workflow" | "sub_workflow" | "subworkflow" => Some(Self::Workflow),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKindTag::Agent => write!(f, "agent"),
            NodeKindTag::Tool => write!(f, "tool"),
            NodeKindTag::Workflow => write!(f, "workflow"),
        }
    }
}

/// What an executor knows about the node it is running.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub workflow_name: String,
    pub node_id: String,
    pub user_input: String,
    pub recursion_depth: usize,
}

/// Output of an agent call: text plus optional structured metadata
/// (e.g. `quality_score`) that conditional edges can route on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOutput {
    pub output: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AgentOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Result of executing a single node attempt.
#[derive(Debug, Clone, Serialize)]
pub struct NodeResult {
    pub node_id: String,
    pub kind: NodeKindTag,
    pub success: bool,
    pub output: serde_json::Value,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<WorkflowError>,
    pub duration_ms: u64,
}

impl NodeResult {
    /// Output rendered as plain text (strings unquoted, structured values as JSON).
    pub fn output_text(&self) -> String {
        value_to_text(&self.output)
    }
}

/// Result of executing an entire workflow. Always produced, even on failure.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow_name: String,
    pub run_id: RunId,
    pub success: bool,
    pub final_output: serde_json::Value,
    /// Attempted node ids in order; a node revisited by a loop appears more than once.
    pub completed_nodes: Vec<String>,
    pub node_results: Vec<NodeResult>,
    pub execution_log: Vec<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<WorkflowError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl WorkflowResult {
    /// Latest result recorded for a node id.
    pub fn node(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_results.iter().rev().find(|r| r.node_id == node_id)
    }

    /// How many times a node was attempted.
    pub fn attempts(&self, node_id: &str) -> usize {
        self.completed_nodes.iter().filter(|id| *id == node_id).count()
    }

    pub fn final_text(&self) -> String {
        value_to_text(&self.final_output)
    }
}

/// Workflow parameters, keyed by name.
pub type Params = HashMap<String, serde_json::Value>;

fn serialize_error<S>(error: &Option<WorkflowError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Render a JSON value the way it should appear inside a string.
pub fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tag_parse() {
        assert_eq!(NodeKindTag::parse("agent"), Some(NodeKindTag::Agent));
        assert_eq!(NodeKindTag::parse(" Tool "), Some(NodeKindTag::Tool));
        assert_eq!(NodeKindTag::parse("workflow"), Some(NodeKindTag::Workflow));
        assert_eq!(NodeKindTag::parse("sub_workflow"), Some(NodeKindTag::Workflow));
        assert_eq!(NodeKindTag::parse("lambda"), None);
        assert_eq!(NodeKindTag::Workflow.to_string(), "workflow");
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&serde_json::json!("plain")), "plain");
        assert_eq!(value_to_text(&serde_json::json!(3)), "3");
        assert_eq!(value_to_text(&serde_json::json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(value_to_text(&serde_json::Value::Null), "");
    }

    #[test]
    fn test_agent_output_builder() {
        let out = AgentOutput::text("done").with_metadata("quality_score", serde_json::json!(8));
        assert_eq!(out.output, "done");
        assert_eq!(out.metadata.get("quality_score"), Some(&serde_json::json!(8)));
    }
}
