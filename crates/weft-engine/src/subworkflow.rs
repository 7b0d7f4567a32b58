//! Preparing a nested workflow call.
//!
//! The guards run before anything executes: the depth limit first, then the
//! ancestry check. The child gets a fresh [`ExecutionState`] carrying a copy
//! of the caller's stack plus the caller itself.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use weft_core::error::WorkflowError;
use weft_core::types::Params;

use crate::registry::WorkflowRegistry;
use crate::resolver::VariableResolver;
use crate::state::ExecutionState;
use crate::template::WorkflowTemplate;

/// A validated child invocation, ready to run.
#[derive(Debug)]
pub struct ChildCall {
    pub template: Arc<WorkflowTemplate>,
    pub state: ExecutionState,
}

/// What a sub-workflow node asks for.
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    pub node_id: &'a str,
    pub workflow_name: &'a str,
    pub workflow_params: &'a Value,
    /// Node-level limit; `None` falls back to the engine default.
    pub max_depth: Option<usize>,
}

/// Check the call is allowed and build the child's state.
pub fn prepare(
    registry: &WorkflowRegistry,
    default_max_depth: usize,
    request: CallRequest<'_>,
    parent: &ExecutionState,
) -> Result<ChildCall, WorkflowError> {
    let depth = parent.recursion_depth + 1;
    let max_depth = request.max_depth.unwrap_or(default_max_depth);
    if depth > max_depth {
        return Err(WorkflowError::RecursionLimitExceeded {
            workflow: request.workflow_name.to_string(),
            depth,
            max_depth,
        });
    }

    if parent.in_call_stack(request.workflow_name) {
        return Err(WorkflowError::CircularDependency {
            workflow: request.workflow_name.to_string(),
            stack: parent.child_stack(),
        });
    }

    let template = registry
        .get(request.workflow_name)
        .ok_or_else(|| WorkflowError::UnknownWorkflow(request.workflow_name.to_string()))?;

    let overrides = VariableResolver::from_state(parent).resolve_value(request.workflow_params);
    let params = merge_params(&template.parameters, &parent.params, overrides, request.node_id);

    let state = ExecutionState::new(template.name.clone(), parent.user_input.clone(), params)
        .nested(parent.child_stack(), depth);
    Ok(ChildCall { template, state })
}

/// Child defaults, then inherited parent params, then the node's overrides.
fn merge_params(defaults: &Params, inherited: &Params, overrides: Value, node_id: &str) -> Params {
    let mut params = defaults.clone();
    params.extend(inherited.iter().map(|(k, v)| (k.clone(), v.clone())));

    let overrides = match overrides {
        Value::String(s) => serde_json::from_str::<Value>(&s).unwrap_or(Value::String(s)),
        other => other,
    };
    match overrides {
        Value::Object(map) => params.extend(map),
        Value::Null => {}
        other => warn!(node_id = %node_id, value = %other, "workflow_params is not an object, ignoring"),
    }
    params
}
