use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Template errors
    #[error("Template validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Template parse error: {0}")]
    TemplateParse(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    // Executor errors
    #[error("Agent call failed: {0}")]
    Agent(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeftError>;

/// Load-time template errors. A template that fails any of these never runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{context}: missing required field '{field}'")]
    MissingField { context: String, field: String },

    #[error("node '{node}': unknown kind '{kind}' (expected agent, tool or workflow)")]
    UnknownNodeKind { node: String, kind: String },

    #[error("template '{0}' has no nodes")]
    EmptyTemplate(String),

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("node '{node}' depends on unknown node '{dependency}'")]
    DanglingDependency { node: String, dependency: String },

    #[error("node '{0}' depends on itself")]
    SelfDependency(String),

    #[error("conditional edge references unknown source node '{0}'")]
    UnknownEdgeSource(String),

    #[error("node '{0}' has more than one conditional edge")]
    DuplicateEdge(String),

    #[error("conditional edge from '{from_node}' routes to unknown node '{target}'")]
    DanglingRoute { from_node: String, target: String },

    #[error("conditional edge from '{0}' has no default")]
    MissingDefault(String),

    #[error("conditional edge from '{from_node}': unknown operator '{operator}'")]
    UnknownOperator { from_node: String, operator: String },

    #[error("cyclic depends_on: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("node '{node}' owns a conditional edge and cannot join parallel group '{group}'")]
    ConditionalNodeInGroup { node: String, group: String },

    #[error("node '{node}' depends on '{dependency}' inside the same parallel group '{group}'")]
    IntraGroupDependency {
        node: String,
        dependency: String,
        group: String,
    },

    #[error("node '{node}' references unknown workflow '{workflow}'")]
    UnknownWorkflow { node: String, workflow: String },

    #[error("workflow '{0}' is registered twice")]
    DuplicateWorkflow(String),
}

/// Runtime failures recorded on node and workflow results.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("node '{node}' failed: {message}")]
    NodeExecution { node: String, message: String },

    #[error("node '{node}' timed out after {timeout_secs}s")]
    Timeout { node: String, timeout_secs: f64 },

    #[error("node '{node}' is missing dependency '{dependency}' (failed or never ran)")]
    MissingDependency { node: String, dependency: String },

    #[error("recursion limit exceeded calling '{workflow}': depth {depth} > max {max_depth}")]
    RecursionLimitExceeded {
        workflow: String,
        depth: usize,
        max_depth: usize,
    },

    #[error("circular sub-workflow call to '{workflow}' (stack: {})", .stack.join(" -> "))]
    CircularDependency { workflow: String, stack: Vec<String> },

    #[error("condition on node '{node}' could not be evaluated: {message}")]
    ConditionEvaluation { node: String, message: String },

    #[error("sub-workflow '{workflow}' called from node '{node}' failed: {source}")]
    SubWorkflow {
        node: String,
        workflow: String,
        source: Box<WorkflowError>,
    },

    #[error("workflow not registered: {0}")]
    UnknownWorkflow(String),
}

impl WorkflowError {
    /// Follow nested sub-workflow failures down to the originating error.
    pub fn root_cause(&self) -> &WorkflowError {
        match self {
            WorkflowError::SubWorkflow { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Short machine-friendly label, used in execution logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Validation(_) => "validation",
            WorkflowError::NodeExecution { .. } => "node_execution",
            WorkflowError::Timeout { .. } => "timeout",
            WorkflowError::MissingDependency { .. } => "missing_dependency",
            WorkflowError::RecursionLimitExceeded { .. } => "recursion_limit_exceeded",
            WorkflowError::CircularDependency { .. } => "circular_dependency",
            WorkflowError::ConditionEvaluation { .. } => "condition_evaluation",
            WorkflowError::SubWorkflow { .. } => "sub_workflow",
            WorkflowError::UnknownWorkflow(_) => "unknown_workflow",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested_sub_workflows() {
        let inner = WorkflowError::RecursionLimitExceeded {
            workflow: "w3".into(),
            depth: 6,
            max_depth: 5,
        };
        let err = WorkflowError::SubWorkflow {
            node: "call".into(),
            workflow: "w1".into(),
            source: Box::new(WorkflowError::SubWorkflow {
                node: "call".into(),
                workflow: "w2".into(),
                source: Box::new(inner.clone()),
            }),
        };
        assert_eq!(err.root_cause(), &inner);
        assert_eq!(err.kind(), "sub_workflow");
        assert_eq!(err.root_cause().kind(), "recursion_limit_exceeded");
    }

    #[test]
    fn test_messages_name_the_offender() {
        let err = ValidationError::DanglingDependency {
            node: "c".into(),
            dependency: "zz".into(),
        };
        assert_eq!(err.to_string(), "node 'c' depends on unknown node 'zz'");

        let err = ValidationError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic depends_on: a -> b -> a");

        let err: WeftError = ValidationError::MissingDefault("check".into()).into();
        assert!(err.to_string().contains("conditional edge from 'check' has no default"));
    }
}
