use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use weft_core::config::EngineSettings;
use weft_core::error::{Result, WeftError, WorkflowError};
use weft_core::event::{EventBus, WorkflowEvent};
use weft_core::traits::{AgentExecutor, ToolCaller};
use weft_core::types::{NodeContext, NodeKindTag, NodeResult, Params, RunId, WorkflowResult};

use crate::condition;
use crate::planner::{ExecutionPlan, Step};
use crate::registry::WorkflowRegistry;
use crate::resolver::VariableResolver;
use crate::state::ExecutionState;
use crate::subworkflow::{self, CallRequest, ChildCall};
use crate::template::{NodeKind, WorkflowNode, WorkflowTemplate};

/// One finished node attempt, not yet applied to the state.
struct NodeOutcome {
    node_id: String,
    kind: NodeKindTag,
    result: std::result::Result<(Value, Map<String, Value>), WorkflowError>,
    duration_ms: u64,
    /// Log lines of a sub-workflow run by this node.
    child_log: Vec<String>,
}

/// What an invocation accumulates for its `WorkflowResult`.
struct RunRecord {
    workflow: String,
    lines: Vec<String>,
    node_results: Vec<NodeResult>,
    final_output: Value,
}

impl RunRecord {
    fn new(workflow: &str) -> Self {
        Self {
            workflow: workflow.to_string(),
            lines: Vec::new(),
            node_results: Vec::new(),
            final_output: Value::Null,
        }
    }

    fn line(&mut self, message: impl AsRef<str>) {
        self.lines.push(format!("[{}] {}", self.workflow, message.as_ref()));
    }
}

/// Executes workflow templates.
///
/// The engine is stateless between invocations: every call to
/// [`Engine::execute`] gets its own [`ExecutionState`], so one engine can
/// serve many concurrent runs. Sub-workflow nodes are resolved through the
/// registry and executed by the same engine.
pub struct Engine {
    registry: Arc<WorkflowRegistry>,
    agent: Arc<dyn AgentExecutor>,
    tools: Arc<dyn ToolCaller>,
    settings: EngineSettings,
    events: Option<Arc<EventBus>>,
}

impl Engine {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        agent: Arc<dyn AgentExecutor>,
        tools: Arc<dyn ToolCaller>,
    ) -> Self {
        Self {
            registry,
            agent,
            tools,
            settings: EngineSettings::default(),
            events: None,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Publish progress events to `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Run a template to completion. Always returns a result; failures are
    /// reported in it rather than as an `Err`.
    ///
    /// `params` override the template's parameter defaults. `user_input` is
    /// also available to placeholders as `{input}` unless `params` sets it.
    pub async fn execute(&self, template: &WorkflowTemplate, user_input: &str, params: Params) -> WorkflowResult {
        let mut merged = template.parameters.clone();
        merged.extend(params);
        merged
            .entry("input".to_string())
            .or_insert_with(|| Value::String(user_input.to_string()));

        let state = ExecutionState::new(template.name.clone(), user_input, merged);
        self.run(template, state).await
    }

    /// Run a registered template by name.
    pub async fn execute_named(&self, name: &str, user_input: &str, params: Params) -> WorkflowResult {
        match self.registry.get(name) {
            Some(template) => self.execute(&template, user_input, params).await,
            None => not_started(name, WorkflowError::UnknownWorkflow(name.to_string())),
        }
    }

    /// Boxed so sub-workflow nodes can recurse into it.
    fn run<'a>(&'a self, template: &'a WorkflowTemplate, state: ExecutionState) -> BoxFuture<'a, WorkflowResult> {
        Box::pin(self.drive(template, state))
    }

    async fn drive(&self, template: &WorkflowTemplate, mut state: ExecutionState) -> WorkflowResult {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        let depth = state.recursion_depth;
        let mut record = RunRecord::new(&template.name);

        info!(workflow = %template.name, run_id = %run_id, depth, "Workflow started");
        self.emit(WorkflowEvent::WorkflowStarted {
            workflow: template.name.clone(),
            run_id: run_id.clone(),
            depth,
        });
        record.line(format!("started (run {}, depth {})", run_id, depth));

        let planned = ExecutionPlan::build(template).and_then(|plan| {
            self.registry.check_references(template)?;
            Ok(plan)
        });
        let fatal = match planned {
            Ok(plan) => {
                debug!(workflow = %template.name, steps = plan.len(), "Execution plan built");
                self.run_plan(template, &plan, &mut state, &mut record).await
            }
            Err(e) => Some(WorkflowError::Validation(e)),
        };

        let success = fatal.is_none();
        let duration_ms = start.elapsed().as_millis() as u64;
        match &fatal {
            None => {
                info!(workflow = %template.name, run_id = %run_id, duration_ms, "Workflow succeeded");
                record.line(format!("finished: success in {}ms", duration_ms));
            }
            Some(e) => {
                error!(workflow = %template.name, run_id = %run_id, error = %e, "Workflow failed");
                record.line(format!("finished: failed in {}ms: {}", duration_ms, e));
            }
        }
        self.emit(WorkflowEvent::WorkflowFinished {
            workflow: template.name.clone(),
            run_id: run_id.clone(),
            success,
        });

        WorkflowResult {
            workflow_name: template.name.clone(),
            run_id,
            success,
            final_output: record.final_output,
            completed_nodes: state.completed_nodes,
            node_results: record.node_results,
            execution_log: record.lines,
            error: fatal,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        }
    }

    /// Consume the plan. Returns the first fatal error, if any.
    async fn run_plan(
        &self,
        template: &WorkflowTemplate,
        plan: &ExecutionPlan,
        state: &mut ExecutionState,
        record: &mut RunRecord,
    ) -> Option<WorkflowError> {
        let mut remaining = plan.queue();

        while let Some(step) = remaining.pop_front() {
            match step {
                Step::Single(node_id) => {
                    let Some(node) = template.node(&node_id) else {
                        warn!(workflow = %template.name, node_id = %node_id, "Planned node not in template, skipping");
                        continue;
                    };
                    let outcome = self.run_node(template, node, state).await;
                    let previous_output = record.final_output.clone();
                    let failure = self.apply(state, record, outcome);

                    if let Some(edge) = template.edge_from(&node_id) {
                        // Failed or not, the edge decides where to go next.
                        match condition::evaluate(edge, state) {
                            Ok(next) => {
                                let looped = state.has_attempted(next);
                                let skipped = plan.reroute(&mut remaining, edge, next, |id| state.has_attempted(id));
                                info!(
                                    workflow = %template.name,
                                    from_node = %node_id,
                                    next_node = %next,
                                    looped,
                                    "Rerouted"
                                );
                                record.line(format!(
                                    "route {} -> {}{}",
                                    node_id,
                                    next,
                                    if looped { " (loop)" } else { "" }
                                ));
                                if !skipped.is_empty() {
                                    record.line(format!("skipped: {}", skipped.join(", ")));
                                }
                                self.emit(WorkflowEvent::Rerouted {
                                    workflow: template.name.clone(),
                                    from_node: node_id.clone(),
                                    next_node: next.to_string(),
                                });
                            }
                            Err(e) => {
                                let err = WorkflowError::ConditionEvaluation {
                                    node: node_id.clone(),
                                    message: e.to_string(),
                                };
                                error!(workflow = %template.name, node_id = %node_id, error = %e, "Condition evaluation failed");
                                state.mark_failed(&node_id, &err.to_string());
                                record.final_output = previous_output;
                                if let Some(last) = record.node_results.last_mut() {
                                    last.success = false;
                                    last.error = Some(err.clone());
                                }
                                record.line(format!("node {} failed: {}", node_id, err));
                                return Some(err);
                            }
                        }
                    } else if let Some(err) = failure {
                        if node.parallel_group.is_none() {
                            return Some(err);
                        }
                    }
                }
                Step::Group { label, nodes } => {
                    let members: Vec<&WorkflowNode> = nodes.iter().filter_map(|id| template.node(id)).collect();
                    let total = members.len();
                    info!(workflow = %template.name, group = %label, members = total, "Running parallel group");

                    let outcomes = self.run_group(template, members, state).await;
                    let failed = outcomes
                        .into_iter()
                        .filter_map(|outcome| self.apply(state, record, outcome))
                        .count();

                    if failed > 0 {
                        warn!(workflow = %template.name, group = %label, failed, total, "Parallel group degraded");
                        record.line(format!("group {}: {} of {} members failed", label, failed, total));
                    } else {
                        record.line(format!("group {}: {} members ok", label, total));
                    }
                }
            }
        }
        None
    }

    /// Run group members concurrently. Nothing is written to the state until
    /// every member has finished.
    async fn run_group(
        &self,
        template: &WorkflowTemplate,
        members: Vec<&WorkflowNode>,
        state: &ExecutionState,
    ) -> Vec<NodeOutcome> {
        let futs: Vec<_> = members.into_iter().map(|node| self.run_node(template, node, state)).collect();
        match self.settings.max_parallel {
            0 => join_all(futs).await,
            limit => stream::iter(futs).buffer_unordered(limit).collect().await,
        }
    }

    async fn run_node(&self, template: &WorkflowTemplate, node: &WorkflowNode, state: &ExecutionState) -> NodeOutcome {
        let start = Instant::now();
        let mut child_log = Vec::new();

        let result = match state.first_unmet(&node.depends_on) {
            Some(dependency) => Err(WorkflowError::MissingDependency {
                node: node.id.clone(),
                dependency: dependency.to_string(),
            }),
            None => {
                info!(workflow = %template.name, node_id = %node.id, kind = %node.kind.tag(), "Executing node");
                self.emit(WorkflowEvent::NodeStarted {
                    workflow: template.name.clone(),
                    node_id: node.id.clone(),
                });
                let timeout = node.timeout.unwrap_or_else(|| self.settings.default_timeout());
                self.dispatch(node, state, timeout, &mut child_log).await
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(workflow = %template.name, node_id = %node.id, elapsed_ms = duration_ms, "Node complete"),
            Err(e) => error!(workflow = %template.name, node_id = %node.id, error = %e, "Node failed"),
        }

        NodeOutcome {
            node_id: node.id.clone(),
            kind: node.kind.tag(),
            result,
            duration_ms,
            child_log,
        }
    }

    /// Hand the node to its executor under the node timeout.
    async fn dispatch(
        &self,
        node: &WorkflowNode,
        state: &ExecutionState,
        timeout: Duration,
        child_log: &mut Vec<String>,
    ) -> std::result::Result<(Value, Map<String, Value>), WorkflowError> {
        let resolver = VariableResolver::from_state(state);

        match &node.kind {
            NodeKind::Agent => {
                let instruction = resolver.resolve_str(&node.instruction);
                let ctx = NodeContext {
                    workflow_name: state.workflow_name.clone(),
                    node_id: node.id.clone(),
                    user_input: state.user_input.clone(),
                    recursion_depth: state.recursion_depth,
                };
                match tokio::time::timeout(timeout, self.agent.invoke(instruction, ctx)).await {
                    Ok(Ok(out)) => Ok((Value::String(out.output), out.metadata)),
                    Ok(Err(e)) => Err(execution_error(node, e)),
                    Err(_) => Err(timed_out(node, timeout)),
                }
            }
            NodeKind::Tool { tool_name, params } => {
                let params = resolver.resolve_value(params);
                debug!(node_id = %node.id, tool = %tool_name, "Calling tool");
                match tokio::time::timeout(timeout, self.tools.call(tool_name, params)).await {
                    Ok(Ok(output)) => Ok((output, Map::new())),
                    Ok(Err(e)) => Err(execution_error(node, e)),
                    Err(_) => Err(timed_out(node, timeout)),
                }
            }
            NodeKind::Workflow {
                workflow_name,
                workflow_params,
                max_depth,
            } => {
                let request = CallRequest {
                    node_id: &node.id,
                    workflow_name,
                    workflow_params,
                    max_depth: *max_depth,
                };
                let ChildCall { template: child, state: child_state } =
                    subworkflow::prepare(&self.registry, self.settings.max_depth, request, state)?;
                info!(
                    node_id = %node.id,
                    workflow = %workflow_name,
                    depth = child_state.recursion_depth,
                    "Invoking sub-workflow"
                );

                let result = match tokio::time::timeout(timeout, self.run(&child, child_state)).await {
                    Ok(result) => result,
                    Err(_) => return Err(timed_out(node, timeout)),
                };
                child_log.extend(result.execution_log);
                if result.success {
                    Ok((result.final_output, Map::new()))
                } else {
                    let source = result.error.unwrap_or_else(|| WorkflowError::NodeExecution {
                        node: node.id.clone(),
                        message: "sub-workflow failed without an error".to_string(),
                    });
                    Err(WorkflowError::SubWorkflow {
                        node: node.id.clone(),
                        workflow: workflow_name.clone(),
                        source: Box::new(source),
                    })
                }
            }
        }
    }

    /// Write an outcome into the state and the run record. Returns the error
    /// if the attempt failed.
    fn apply(&self, state: &mut ExecutionState, record: &mut RunRecord, outcome: NodeOutcome) -> Option<WorkflowError> {
        let NodeOutcome {
            node_id,
            kind,
            result,
            duration_ms,
            child_log,
        } = outcome;
        record.lines.extend(child_log);

        let (success, output, error) = match result {
            Ok((output, metadata)) => {
                state.record_success(&node_id, output.clone());
                state.merge_metadata(&node_id, &metadata);
                record.final_output = output.clone();
                record.line(format!("node {} ({}) ok in {}ms", node_id, kind, duration_ms));
                (true, output, None)
            }
            Err(e) => {
                state.record_failure(&node_id, &e.to_string());
                record.line(format!("node {} ({}) failed in {}ms: {}", node_id, kind, duration_ms, e));
                (false, Value::Null, Some(e))
            }
        };

        self.emit(WorkflowEvent::NodeFinished {
            workflow: state.workflow_name.clone(),
            node_id: node_id.clone(),
            success,
            elapsed_ms: duration_ms,
        });
        record.node_results.push(NodeResult {
            node_id,
            kind,
            success,
            output,
            error: error.clone(),
            duration_ms,
        });
        error
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

/// Run a template to completion from synchronous code.
///
/// Builds a current-thread runtime, so it must not be called from inside
/// one; use [`Engine::execute`] there.
pub fn execute_workflow(
    engine: &Engine,
    template: &WorkflowTemplate,
    user_input: &str,
    params: Params,
) -> Result<WorkflowResult> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(WeftError::Io)?;
    Ok(runtime.block_on(engine.execute(template, user_input, params)))
}

fn execution_error(node: &WorkflowNode, e: WeftError) -> WorkflowError {
    WorkflowError::NodeExecution {
        node: node.id.clone(),
        message: e.to_string(),
    }
}

fn timed_out(node: &WorkflowNode, timeout: Duration) -> WorkflowError {
    WorkflowError::Timeout {
        node: node.id.clone(),
        timeout_secs: timeout.as_secs_f64(),
    }
}

/// Result for an invocation that failed before any node ran.
fn not_started(workflow: &str, error: WorkflowError) -> WorkflowResult {
    let now = Utc::now();
    WorkflowResult {
        workflow_name: workflow.to_string(),
        run_id: RunId::new(),
        success: false,
        final_output: Value::Null,
        completed_nodes: vec![],
        node_results: vec![],
        execution_log: vec![format!("[{}] not started: {}", workflow, error)],
        error: Some(error),
        started_at: now,
        finished_at: now,
        duration_ms: 0,
    }
}
