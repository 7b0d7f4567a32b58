use serde_json::json;

use weft_core::error::{ValidationError, WeftError};
use weft_engine::{ExecutionPlan, NodeKind, Operator, WorkflowRegistry, WorkflowTemplate};
use weft_test_utils::{agent_node, condition, edge, template, template_dir, workflow_node, write_template};

fn validation_error(value: serde_json::Value) -> ValidationError {
    match WorkflowTemplate::from_value(value) {
        Err(WeftError::Validation(e)) => e,
        Err(other) => panic!("expected a validation error, got {}", other),
        Ok(t) => panic!("template '{}' unexpectedly valid", t.name),
    }
}

#[test]
fn test_yaml_template_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("review.yaml");
    std::fs::write(
        &path,
        r#"
name: review_loop
version: "2.1"
description: Draft, review, publish
parameters:
  topic: rust
nodes:
  - id: draft
    kind: agent
    instruction: "Write about {topic}"
    timeout: 1.5
  - id: review
    kind: agent
    instruction: "Review {draft}"
    depends_on: draft
  - id: publish
    kind: tool
    tool_name: publish
    params:
      body: "{draft}"
      tags: [blog, "{topic}"]
    depends_on: [review]
conditional_edges:
  - from_node: review
    conditions:
      - { field: quality_score, operator: ">=", value: 8, next_node: publish }
    default: draft
"#,
    )
    .unwrap();

    let t = WorkflowTemplate::from_file(&path).unwrap();
    assert_eq!(t.name, "review_loop");
    assert_eq!(t.version, "2.1");
    assert_eq!(t.parameters["topic"], json!("rust"));
    assert_eq!(t.node("draft").unwrap().timeout, Some(std::time::Duration::from_millis(1500)));
    assert_eq!(t.node("review").unwrap().depends_on, vec!["draft"]);
    match &t.node("publish").unwrap().kind {
        NodeKind::Tool { tool_name, params } => {
            assert_eq!(tool_name, "publish");
            assert_eq!(params["tags"][1], json!("{topic}"));
        }
        other => panic!("expected tool node, got {:?}", other),
    }
    let e = t.edge_from("review").unwrap();
    assert_eq!(e.conditions[0].operator, Operator::GreaterOrEqual);
    assert_eq!(e.default, "draft");
}

#[test]
fn test_json_template_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_template(
        dir.path(),
        "chain.json",
        &template("chain", vec![agent_node("a", "go", &[]), agent_node("b", "{a}", &["a"])], vec![]),
    );
    let t = WorkflowTemplate::from_file(&path).unwrap();
    assert_eq!(t.nodes.len(), 2);
    assert_eq!(ExecutionPlan::build(&t).unwrap().node_order(), vec!["a", "b"]);
}

#[test]
fn test_unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.txt");
    std::fs::write(&path, "name: x").unwrap();
    assert!(matches!(WorkflowTemplate::from_file(&path), Err(WeftError::TemplateParse(_))));
}

#[test]
fn test_malformed_yaml_is_parse_error() {
    let err = WorkflowTemplate::from_yaml("name: [unclosed").unwrap_err();
    assert!(matches!(err, WeftError::TemplateParse(_)));
}

#[test]
fn test_static_cycle_rejected_at_load() {
    let err = validation_error(template(
        "cyclic",
        vec![agent_node("a", "a", &["b"]), agent_node("b", "b", &["a"])],
        vec![],
    ));
    assert!(matches!(err, ValidationError::CyclicDependency { .. }));
}

#[test]
fn test_dangling_references_rejected_at_load() {
    let err = validation_error(template("t", vec![agent_node("a", "a", &["ghost"])], vec![]));
    assert_eq!(
        err,
        ValidationError::DanglingDependency {
            node: "a".into(),
            dependency: "ghost".into()
        }
    );

    let err = validation_error(template(
        "t",
        vec![agent_node("a", "a", &[]), agent_node("b", "b", &["a"])],
        vec![edge("a", vec![condition("ok", "equals", json!(true), "ghost")], "b")],
    ));
    assert!(matches!(err, ValidationError::DanglingRoute { ref target, .. } if target == "ghost"));

    let err = validation_error(template(
        "t",
        vec![agent_node("a", "a", &[])],
        vec![edge("a", vec![], "nowhere")],
    ));
    assert!(matches!(err, ValidationError::DanglingRoute { .. }));
}

#[test]
fn test_missing_default_rejected() {
    let err = validation_error(json!({
        "name": "t",
        "nodes": [agent_node("a", "a", &[]), agent_node("b", "b", &["a"])],
        "conditional_edges": [{"from_node": "a", "conditions": [condition("x", ">", json!(1), "b")]}]
    }));
    assert_eq!(err, ValidationError::MissingDefault("a".into()));
}

#[test]
fn test_duplicate_ids_rejected() {
    let err = validation_error(template("t", vec![agent_node("a", "1", &[]), agent_node("a", "2", &[])], vec![]));
    assert_eq!(err, ValidationError::DuplicateNode("a".into()));
}

#[test]
fn test_missing_kind_field_names_the_node() {
    let err = validation_error(json!({
        "name": "t",
        "nodes": [{"id": "fetch", "kind": "tool"}]
    }));
    assert!(err.to_string().contains("fetch"), "{}", err);
    assert!(err.to_string().contains("tool_name"), "{}", err);
}

#[test]
fn test_registry_from_directory() {
    let dir = template_dir(&[
        template("leaf", vec![agent_node("n", "leaf work", &[])], vec![]),
        template("root", vec![workflow_node("call", "leaf", json!({}), &[])], vec![]),
    ]);
    let registry = WorkflowRegistry::from_dirs(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(registry.names(), vec!["leaf", "root"]);
}

#[test]
fn test_registry_rejects_unknown_sub_workflow() {
    let dir = template_dir(&[template("root", vec![workflow_node("call", "missing", json!({}), &[])], vec![])]);
    let err = WorkflowRegistry::from_dirs(&[dir.path().to_path_buf()]).unwrap_err();
    assert!(matches!(
        err,
        WeftError::Validation(ValidationError::UnknownWorkflow { ref workflow, .. }) if workflow == "missing"
    ));
}
