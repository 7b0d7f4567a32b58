use std::sync::Arc;

use serde_json::{json, Value};

use weft_core::config::EngineSettings;
use weft_core::error::{ValidationError, WorkflowError};
use weft_core::traits::AgentExecutor;
use weft_core::types::Params;
use weft_engine::{EchoAgent, EchoTool, Engine, WorkflowRegistry, WorkflowTemplate};
use weft_test_utils::{agent_node, template, workflow_node, ScriptedAgent};

fn registry(templates: Vec<Value>) -> WorkflowRegistry {
    let templates = templates
        .into_iter()
        .map(|t| WorkflowTemplate::from_value(t).expect("valid template"));
    WorkflowRegistry::from_templates(templates).expect("references resolve")
}

fn engine(registry: WorkflowRegistry, agent: Arc<dyn AgentExecutor>) -> Engine {
    Engine::new(Arc::new(registry), agent, Arc::new(EchoTool))
}

/// `w0 -> w1 -> ... -> w{len-1}`, the last one running a single agent node.
fn chain(len: usize) -> WorkflowRegistry {
    let templates = (0..len)
        .map(|i| {
            let node = if i + 1 < len {
                workflow_node("call", &format!("w{}", i + 1), json!({}), &[])
            } else {
                agent_node("leaf", "bottom", &[])
            };
            template(&format!("w{}", i), vec![node], vec![])
        })
        .collect();
    registry(templates)
}

#[tokio::test]
async fn test_self_reference_is_circular() {
    let reg = registry(vec![template(
        "selfie",
        vec![
            agent_node("before", "prep", &[]),
            workflow_node("call", "selfie", json!({}), &["before"]),
        ],
        vec![],
    )]);
    let agent = Arc::new(ScriptedAgent::new());
    let result = engine(reg, agent.clone()).execute_named("selfie", "", Params::new()).await;

    assert!(!result.success);
    match result.error {
        Some(WorkflowError::CircularDependency { workflow, .. }) => assert_eq!(workflow, "selfie"),
        other => panic!("expected circular dependency, got {:?}", other),
    }
    // Only the outer invocation ever reached the agent.
    let calls = agent.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].recursion_depth, 0);
}

#[tokio::test]
async fn test_mutual_recursion_is_circular() {
    let reg = registry(vec![
        template("a", vec![workflow_node("call", "b", json!({}), &[])], vec![]),
        template("b", vec![workflow_node("call", "a", json!({}), &[])], vec![]),
    ]);
    let result = engine(reg, Arc::new(EchoAgent)).execute_named("a", "", Params::new()).await;

    let err = result.error.expect("run fails");
    assert_eq!(err.kind(), "sub_workflow");
    match err.root_cause() {
        WorkflowError::CircularDependency { workflow, stack } => {
            assert_eq!(workflow, "a");
            assert_eq!(stack, &vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected circular dependency, got {:?}", other),
    }
}

#[tokio::test]
async fn test_chain_within_depth_limit() {
    let agent = Arc::new(ScriptedAgent::new());
    let result = engine(chain(6), agent.clone()).execute_named("w0", "", Params::new()).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.final_output, json!("bottom"));
    let calls = agent.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].workflow_name, "w5");
    assert_eq!(calls[0].recursion_depth, 5);
}

#[tokio::test]
async fn test_chain_beyond_depth_limit() {
    let agent = Arc::new(ScriptedAgent::new());
    let result = engine(chain(7), agent.clone()).execute_named("w0", "", Params::new()).await;

    assert!(!result.success);
    let err = result.error.expect("run fails");
    assert_eq!(
        err.root_cause(),
        &WorkflowError::RecursionLimitExceeded {
            workflow: "w6".into(),
            depth: 6,
            max_depth: 5,
        }
    );
    assert!(agent.calls().is_empty());
}

#[tokio::test]
async fn test_configured_depth_limit() {
    let settings = EngineSettings {
        max_depth: 2,
        ..Default::default()
    };
    let ok = engine(chain(3), Arc::new(EchoAgent))
        .with_settings(settings.clone())
        .execute_named("w0", "", Params::new())
        .await;
    assert!(ok.success, "{:?}", ok.error);

    let too_deep = engine(chain(4), Arc::new(EchoAgent))
        .with_settings(settings)
        .execute_named("w0", "", Params::new())
        .await;
    assert_eq!(too_deep.error.map(|e| e.root_cause().kind()), Some("recursion_limit_exceeded"));
}

#[tokio::test]
async fn test_node_level_depth_limit() {
    let reg = registry(vec![
        json!({
            "name": "root",
            "nodes": [{"id": "call", "kind": "workflow", "workflow_name": "child", "max_depth": 0}]
        }),
        template("child", vec![agent_node("n", "never", &[])], vec![]),
    ]);
    let result = engine(reg, Arc::new(EchoAgent)).execute_named("root", "", Params::new()).await;

    assert_eq!(
        result.error,
        Some(WorkflowError::RecursionLimitExceeded {
            workflow: "child".into(),
            depth: 1,
            max_depth: 0,
        })
    );
}

fn report_registry() -> WorkflowRegistry {
    registry(vec![
        json!({
            "name": "report",
            "parameters": {"audience": "team"},
            "nodes": [
                agent_node("outline", "outline on {input}", &[]),
                workflow_node("call", "summarize", json!({"text": "{outline}"}), &["outline"]),
                agent_node("publish", "publish {call}", &["call"])
            ]
        }),
        json!({
            "name": "summarize",
            "parameters": {"text": "nothing", "style": "brief", "audience": "public"},
            "nodes": [agent_node("sum", "{style} summary of {text} for {audience}", &[])]
        }),
    ])
}

#[tokio::test]
async fn test_child_params_inherit_and_override() {
    let agent = Arc::new(ScriptedAgent::new());
    let result = engine(report_registry(), agent.clone())
        .execute_named("report", "Q3", Params::new())
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.completed_nodes, vec!["outline", "call", "publish"]);
    assert_eq!(result.node("call").unwrap().output, json!("brief summary of outline on Q3 for team"));
    assert_eq!(result.final_text(), "publish brief summary of outline on Q3 for team");

    let child_call = agent.calls().into_iter().find(|c| c.node_id == "sum").unwrap();
    assert_eq!(child_call.workflow_name, "summarize");
    assert_eq!(child_call.recursion_depth, 1);
}

#[tokio::test]
async fn test_child_log_folded_into_parent() {
    let result = engine(report_registry(), Arc::new(EchoAgent))
        .execute_named("report", "Q3", Params::new())
        .await;

    let log = &result.execution_log;
    let child_line = log.iter().position(|l| l.starts_with("[summarize] node sum")).unwrap();
    let parent_line = log.iter().position(|l| l.starts_with("[report] node call")).unwrap();
    assert!(child_line < parent_line);
    assert!(log.last().unwrap().starts_with("[report] finished: success"));
}

#[tokio::test]
async fn test_child_failure_is_wrapped() {
    let agent = ScriptedAgent::new().fail("sum", "quota exceeded");
    let result = engine(report_registry(), Arc::new(agent))
        .execute_named("report", "Q3", Params::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.completed_nodes, vec!["outline", "call"]);
    let err = result.error.expect("run fails");
    match &err {
        WorkflowError::SubWorkflow { node, workflow, .. } => {
            assert_eq!(node, "call");
            assert_eq!(workflow, "summarize");
        }
        other => panic!("expected sub-workflow error, got {:?}", other),
    }
    assert_eq!(err.root_cause().kind(), "node_execution");
    assert!(err.root_cause().to_string().contains("quota exceeded"));
}

#[tokio::test]
async fn test_unregistered_template_with_unknown_reference_fails_before_running() {
    let t = WorkflowTemplate::from_value(template(
        "adhoc",
        vec![
            agent_node("first", "warm up", &[]),
            workflow_node("call", "ghost", json!({}), &["first"]),
        ],
        vec![],
    ))
    .expect("valid template");
    let agent = Arc::new(ScriptedAgent::new());
    let result = engine(WorkflowRegistry::new(), agent.clone()).execute(&t, "", Params::new()).await;

    assert!(!result.success);
    assert_eq!(
        result.error,
        Some(WorkflowError::Validation(ValidationError::UnknownWorkflow {
            node: "adhoc.call".into(),
            workflow: "ghost".into(),
        }))
    );
    assert!(result.completed_nodes.is_empty());
    assert!(agent.calls().is_empty());
}
