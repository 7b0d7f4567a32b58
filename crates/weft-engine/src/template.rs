//! Workflow template model.
//!
//! Templates are deserialized into the flat [`TemplateSpec`] shape (JSON or
//! YAML) and then converted into a validated, immutable [`WorkflowTemplate`]:
//!
//! ```yaml
//! name: review_loop
//! version: "1.0"
//! parameters:
//!   topic: "rust"
//! nodes:
//!   - id: draft
//!     kind: agent
//!     instruction: "Write about {topic}. Previous feedback: {review}"
//!   - id: review
//!     kind: agent
//!     instruction: "Score this draft: {draft}"
//!     depends_on: [draft]
//!   - id: publish
//!     kind: tool
//!     tool_name: publish
//!     params: { body: "{draft}" }
//!     depends_on: [review]
//! conditional_edges:
//!   - from_node: review
//!     conditions:
//!       - { field: quality_score, operator: ">=", value: 8, next_node: publish }
//!     default: draft
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use weft_core::error::{Result, ValidationError, WeftError};
use weft_core::types::{NodeKindTag, Params};

use crate::planner::ExecutionPlan;

// ── Serialized shape ────────────────────────────────────────────

/// Template as it appears on disk. Unknown fields are ignored and every
/// field is optional here so validation can name what is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSpec {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub parameters: Params,
    pub nodes: Vec<NodeSpec>,
    pub conditional_edges: Vec<EdgeSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    pub id: Option<String>,
    pub kind: Option<String>,
    pub instruction: Option<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub depends_on: Vec<String>,
    pub parallel_group: Option<String>,
    /// Seconds.
    pub timeout: Option<f64>,
    pub tool_name: Option<String>,
    pub params: Option<serde_json::Value>,
    pub workflow_name: Option<String>,
    pub workflow_params: Option<serde_json::Value>,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeSpec {
    pub from_node: Option<String>,
    pub conditions: Vec<ConditionSpec>,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionSpec {
    pub field: Option<String>,
    #[serde(alias = "op")]
    pub operator: Option<String>,
    pub value: serde_json::Value,
    pub next_node: Option<String>,
}

/// Accept `depends_on: a` as shorthand for `depends_on: [a]`.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.trim().is_empty() => vec![],
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Null(()) => vec![],
    })
}

// ── Validated model ─────────────────────────────────────────────

/// A validated workflow template. Read-only after loading and safe to share
/// across invocations.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Declared parameters with their default values.
    pub parameters: Params,
    pub nodes: Vec<WorkflowNode>,
    pub conditional_edges: Vec<ConditionalEdge>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct WorkflowNode {
    pub id: String,
    pub kind: NodeKind,
    pub instruction: String,
    pub depends_on: Vec<String>,
    pub parallel_group: Option<String>,
    /// `None` means the engine default applies.
    pub timeout: Option<Duration>,
}

/// What a node runs, with the fields only that kind needs.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Agent,
    Tool {
        tool_name: String,
        params: serde_json::Value,
    },
    Workflow {
        workflow_name: String,
        workflow_params: serde_json::Value,
        /// `None` means the engine's global depth limit applies.
        max_depth: Option<usize>,
    },
}

impl NodeKind {
    pub fn tag(&self) -> NodeKindTag {
        match self {
            NodeKind::Agent => NodeKindTag::Agent,
            NodeKind::Tool { .. } => NodeKindTag::Tool,
            NodeKind::Workflow { .. } => NodeKindTag::Workflow,
        }
    }
}

/// Routing rule evaluated after `from_node` runs. First matching condition wins.
#[derive(Debug, Clone)]
pub struct ConditionalEdge {
    pub from_node: String,
    pub conditions: Vec<Condition>,
    pub default: String,
}

impl ConditionalEdge {
    /// Every node this edge can route to, in declaration order, default last.
    pub fn targets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for c in &self.conditions {
            if !out.contains(&c.next_node.as_str()) {
                out.push(&c.next_node);
            }
        }
        if !out.contains(&self.default.as_str()) {
            out.push(&self.default);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: serde_json::Value,
    pub next_node: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    NotContains,
    In,
    NotIn,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "equals" | "eq" | "==" => Ok(Operator::Equals),
            "not_equals" | "ne" | "!=" => Ok(Operator::NotEquals),
            ">" | "gt" => Ok(Operator::GreaterThan),
            "<" | "lt" => Ok(Operator::LessThan),
            ">=" | "gte" => Ok(Operator::GreaterOrEqual),
            "<=" | "lte" => Ok(Operator::LessOrEqual),
            "contains" => Ok(Operator::Contains),
            "not_contains" => Ok(Operator::NotContains),
            "in" => Ok(Operator::In),
            "not_in" => Ok(Operator::NotIn),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::In => "in",
            Operator::NotIn => "not_in",
        };
        write!(f, "{}", s)
    }
}

impl WorkflowTemplate {
    /// Parse and validate a JSON template.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: TemplateSpec = serde_json::from_str(json)?;
        Ok(Self::from_spec(spec)?)
    }

    /// Parse and validate a YAML template.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let spec: TemplateSpec = serde_yaml::from_str(yaml)
            .map_err(|e| WeftError::TemplateParse(format!("Failed to parse workflow YAML: {}", e)))?;
        Ok(Self::from_spec(spec)?)
    }

    /// Validate an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let spec: TemplateSpec = serde_json::from_value(value)?;
        Ok(Self::from_spec(spec)?)
    }

    /// Load a template file; the format follows the extension
    /// (`.json`, `.yaml`, `.yml`).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::TemplateNotFound(path.display().to_string()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Err(WeftError::TemplateParse(format!(
                "Unsupported template extension: {}",
                path.display()
            ))),
        }
    }

    /// Convert the serialized shape into the validated model.
    ///
    /// Checks:
    /// - required fields are present, node kinds and operators are known
    /// - node ids are unique
    /// - `depends_on`, `from_node`, `next_node` and `default` reference declared nodes
    /// - at most one conditional edge per source node
    /// - static `depends_on` is acyclic and parallel groups are well-formed
    pub fn from_spec(spec: TemplateSpec) -> std::result::Result<Self, ValidationError> {
        let name = required(spec.name, "template", "name")?;

        let mut nodes = Vec::with_capacity(spec.nodes.len());
        for (i, node) in spec.nodes.into_iter().enumerate() {
            nodes.push(convert_node(node, i)?);
        }
        if nodes.is_empty() {
            return Err(ValidationError::EmptyTemplate(name));
        }

        let mut index = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(ValidationError::DuplicateNode(node.id.clone()));
            }
        }

        let mut conditional_edges = Vec::with_capacity(spec.conditional_edges.len());
        for (i, edge) in spec.conditional_edges.into_iter().enumerate() {
            conditional_edges.push(convert_edge(edge, i)?);
        }

        let template = Self {
            name,
            version: spec.version.unwrap_or_else(|| "1.0".to_string()),
            description: spec.description.unwrap_or_default(),
            parameters: spec.parameters,
            nodes,
            conditional_edges,
            index,
        };
        template.check_references()?;
        ExecutionPlan::build(&template)?;
        Ok(template)
    }

    fn check_references(&self) -> std::result::Result<(), ValidationError> {
        for node in &self.nodes {
            for dep in &node.depends_on {
                if dep == &node.id {
                    return Err(ValidationError::SelfDependency(node.id.clone()));
                }
                if !self.index.contains_key(dep) {
                    return Err(ValidationError::DanglingDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut sources = HashSet::new();
        for edge in &self.conditional_edges {
            if !self.index.contains_key(&edge.from_node) {
                return Err(ValidationError::UnknownEdgeSource(edge.from_node.clone()));
            }
            if !sources.insert(edge.from_node.as_str()) {
                return Err(ValidationError::DuplicateEdge(edge.from_node.clone()));
            }
            for target in edge.targets() {
                if !self.index.contains_key(target) {
                    return Err(ValidationError::DanglingRoute {
                        from_node: edge.from_node.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Declaration index of a node.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// The conditional edge leaving `node_id`, if any.
    pub fn edge_from(&self, node_id: &str) -> Option<&ConditionalEdge> {
        self.conditional_edges.iter().find(|e| e.from_node == node_id)
    }

    /// Names of the templates invoked by sub-workflow nodes.
    pub fn referenced_workflows(&self) -> Vec<(&str, &str)> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Workflow { workflow_name, .. } => {
                    Some((n.id.as_str(), workflow_name.as_str()))
                }
                _ => None,
            })
            .collect()
    }
}

fn required(
    value: Option<String>,
    context: &str,
    field: &str,
) -> std::result::Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField {
            context: context.to_string(),
            field: field.to_string(),
        }),
    }
}

fn convert_node(spec: NodeSpec, position: usize) -> std::result::Result<WorkflowNode, ValidationError> {
    let id = required(spec.id, &format!("node #{}", position), "id")?;
    let context = format!("node '{}'", id);
    let kind_str = required(spec.kind, &context, "kind")?;
    let tag = NodeKindTag::parse(&kind_str).ok_or_else(|| ValidationError::UnknownNodeKind {
        node: id.clone(),
        kind: kind_str.clone(),
    })?;

    let kind = match tag {
        NodeKindTag::Agent => NodeKind::Agent,
        NodeKindTag::Tool => NodeKind::Tool {
            tool_name: required(spec.tool_name, &context, "tool_name")?,
            params: spec.params.unwrap_or_else(|| serde_json::json!({})),
        },
        NodeKindTag::Workflow => NodeKind::Workflow {
            workflow_name: required(spec.workflow_name, &context, "workflow_name")?,
            workflow_params: spec.workflow_params.unwrap_or_else(|| serde_json::json!({})),
            max_depth: spec.max_depth,
        },
    };

    // Agent nodes have nothing to run without an instruction.
    let instruction = match (tag, spec.instruction) {
        (NodeKindTag::Agent, instruction) => required(instruction, &context, "instruction")?,
        (_, instruction) => instruction.unwrap_or_default(),
    };

    Ok(WorkflowNode {
        id,
        kind,
        instruction,
        depends_on: spec.depends_on,
        parallel_group: spec.parallel_group.filter(|g| !g.trim().is_empty()),
        timeout: spec
            .timeout
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(Duration::from_secs_f64),
    })
}

fn convert_edge(spec: EdgeSpec, position: usize) -> std::result::Result<ConditionalEdge, ValidationError> {
    let from_node = required(spec.from_node, &format!("conditional edge #{}", position), "from_node")?;
    let context = format!("conditional edge from '{}'", from_node);
    let default = spec
        .default
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| ValidationError::MissingDefault(from_node.clone()))?;

    let mut conditions = Vec::with_capacity(spec.conditions.len());
    for (i, c) in spec.conditions.into_iter().enumerate() {
        let cond_context = format!("{} condition #{}", context, i);
        let operator_str = required(c.operator, &cond_context, "operator")?;
        let operator = operator_str
            .parse::<Operator>()
            .map_err(|operator| ValidationError::UnknownOperator {
                from_node: from_node.clone(),
                operator,
            })?;
        conditions.push(Condition {
            field: required(c.field, &cond_context, "field")?,
            operator,
            value: c.value,
            next_node: required(c.next_node, &cond_context, "next_node")?,
        });
    }

    Ok(ConditionalEdge {
        from_node,
        conditions,
        default,
    })
}
