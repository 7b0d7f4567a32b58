//! Weft workflow engine: declarative multi-node workflow execution.
//!
//! A workflow template is a graph of nodes (agent calls, tool calls or
//! nested workflows) wired together with `depends_on` lists, optional
//! parallel groups, and conditional edges that re-route execution based on
//! node metadata.
//!
//! ```text
//! template.json ──► WorkflowTemplate ──► ExecutionPlan ──► Engine
//!                        │                                  │
//!                  WorkflowRegistry ◄──── sub-workflows ────┤
//!                                                           ├─ AgentExecutor
//!                                                           └─ ToolCaller
//! ```

pub mod condition;
pub mod engine;
pub mod executors;
pub mod planner;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod subworkflow;
pub mod template;
pub mod tools;

pub use condition::{evaluate, ConditionError};
pub use engine::{execute_workflow, Engine};
pub use executors::{EchoAgent, EchoTool};
pub use planner::{ExecutionPlan, Step};
pub use registry::WorkflowRegistry;
pub use resolver::VariableResolver;
pub use state::ExecutionState;
pub use template::{
    Condition, ConditionalEdge, NodeKind, Operator, TemplateSpec, WorkflowNode, WorkflowTemplate,
};
pub use tools::{Tool, ToolRegistry};
