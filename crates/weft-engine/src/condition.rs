//! Condition evaluation for conditional edges.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::state::ExecutionState;
use crate::template::{Condition, ConditionalEdge, Operator};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("field '{field}': operator '{operator}' needs numeric operands, got {actual} and {expected}")]
    NotNumeric {
        field: String,
        operator: Operator,
        actual: Value,
        expected: Value,
    },

    #[error("field '{field}': operator '{operator}' cannot apply to {actual} and {expected}")]
    Unsupported {
        field: String,
        operator: Operator,
        actual: Value,
        expected: Value,
    },
}

/// Pick the next node for `edge`: the `next_node` of the first matching
/// condition, else the edge default.
///
/// Fields are read from `custom_metadata`. A missing or null field never
/// matches, whatever the operator.
pub fn evaluate<'e>(edge: &'e ConditionalEdge, state: &ExecutionState) -> Result<&'e str, ConditionError> {
    for condition in &edge.conditions {
        if matches(condition, &state.custom_metadata)? {
            return Ok(&condition.next_node);
        }
    }
    Ok(&edge.default)
}

fn matches(condition: &Condition, metadata: &Map<String, Value>) -> Result<bool, ConditionError> {
    let actual = match lookup(metadata, &condition.field) {
        Some(Value::Null) | None => return Ok(false),
        Some(v) => v,
    };
    let expected = &condition.value;

    let numeric = |cmp: fn(f64, f64) -> bool| match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => Ok(cmp(a, b)),
        _ => Err(ConditionError::NotNumeric {
            field: condition.field.clone(),
            operator: condition.operator,
            actual: actual.clone(),
            expected: expected.clone(),
        }),
    };
    let unsupported = || ConditionError::Unsupported {
        field: condition.field.clone(),
        operator: condition.operator,
        actual: actual.clone(),
        expected: expected.clone(),
    };

    match condition.operator {
        Operator::Equals => Ok(loosely_equal(actual, expected)),
        Operator::NotEquals => Ok(!loosely_equal(actual, expected)),
        Operator::GreaterThan => numeric(|a, b| a > b),
        Operator::LessThan => numeric(|a, b| a < b),
        Operator::GreaterOrEqual => numeric(|a, b| a >= b),
        Operator::LessOrEqual => numeric(|a, b| a <= b),
        Operator::Contains => contains(actual, expected).ok_or_else(unsupported),
        Operator::NotContains => contains(actual, expected).map(|c| !c).ok_or_else(unsupported),
        Operator::In => contains(expected, actual).ok_or_else(unsupported),
        Operator::NotIn => contains(expected, actual).map(|c| !c).ok_or_else(unsupported),
    }
}

/// Resolve `x`, `custom_metadata.x` or `node_id.x` against the metadata map.
fn lookup<'m>(metadata: &'m Map<String, Value>, field: &str) -> Option<&'m Value> {
    let field = field.strip_prefix("custom_metadata.").unwrap_or(field);
    if let Some(v) = metadata.get(field) {
        return Some(v);
    }
    let mut segments = field.split('.');
    let mut current = metadata.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Numbers compare by value; a string equals a number or bool that renders the same.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), other @ (Value::Number(_) | Value::Bool(_)))
        | (other @ (Value::Number(_) | Value::Bool(_)), Value::String(s)) => s.trim() == other.to_string(),
        _ => a == b,
    }
}

/// Whether `haystack` contains `needle`; `None` when the types don't allow it.
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => Some(s.contains(n.as_str())),
            Value::Number(_) | Value::Bool(_) => Some(s.contains(&needle.to_string())),
            _ => None,
        },
        Value::Array(items) => Some(items.iter().any(|item| loosely_equal(item, needle))),
        Value::Object(map) => needle.as_str().map(|key| map.contains_key(key)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::types::Params;

    fn edge(conditions: Vec<(&str, Operator, Value, &str)>, default: &str) -> ConditionalEdge {
        ConditionalEdge {
            from_node: "check".into(),
            conditions: conditions
                .into_iter()
                .map(|(field, operator, value, next)| Condition {
                    field: field.into(),
                    operator,
                    value,
                    next_node: next.into(),
                })
                .collect(),
            default: default.into(),
        }
    }

    fn state(metadata: Value) -> ExecutionState {
        let mut state = ExecutionState::new("wf", "", Params::new());
        if let Value::Object(map) = metadata {
            state.custom_metadata = map;
        }
        state
    }

    #[test]
    fn test_greater_than_routing() {
        let e = edge(vec![("x", Operator::GreaterThan, json!(5), "A")], "B");
        assert_eq!(evaluate(&e, &state(json!({"x": 10}))).unwrap(), "A");
        assert_eq!(evaluate(&e, &state(json!({"x": 3}))).unwrap(), "B");
        assert_eq!(evaluate(&e, &state(json!({}))).unwrap(), "B");
    }

    #[test]
    fn test_first_match_wins() {
        let e = edge(
            vec![
                ("score", Operator::GreaterOrEqual, json!(9), "excellent"),
                ("score", Operator::GreaterOrEqual, json!(5), "ok"),
            ],
            "retry",
        );
        assert_eq!(evaluate(&e, &state(json!({"score": 9.5}))).unwrap(), "excellent");
        assert_eq!(evaluate(&e, &state(json!({"score": 5}))).unwrap(), "ok");
        assert_eq!(evaluate(&e, &state(json!({"score": 4}))).unwrap(), "retry");
    }

    #[test]
    fn test_missing_and_null_never_match() {
        let e = edge(
            vec![
                ("status", Operator::NotEquals, json!("done"), "A"),
                ("status", Operator::NotIn, json!(["done"]), "B"),
            ],
            "C",
        );
        assert_eq!(evaluate(&e, &state(json!({}))).unwrap(), "C");
        assert_eq!(evaluate(&e, &state(json!({"status": null}))).unwrap(), "C");
        assert_eq!(evaluate(&e, &state(json!({"status": "busy"}))).unwrap(), "A");
    }

    #[test]
    fn test_numeric_operator_on_text_is_error() {
        let e = edge(vec![("score", Operator::GreaterThan, json!(5), "A")], "B");
        let err = evaluate(&e, &state(json!({"score": "high"}))).unwrap_err();
        assert!(matches!(err, ConditionError::NotNumeric { .. }));
        assert!(err.to_string().contains("score"));
    }

    #[test]
    fn test_equals_is_loose_across_string_and_scalar() {
        let e = edge(vec![("ok", Operator::Equals, json!(true), "yes")], "no");
        assert_eq!(evaluate(&e, &state(json!({"ok": "true"}))).unwrap(), "yes");
        assert_eq!(evaluate(&e, &state(json!({"ok": false}))).unwrap(), "no");

        let e = edge(vec![("n", Operator::Equals, json!(3), "yes")], "no");
        assert_eq!(evaluate(&e, &state(json!({"n": 3.0}))).unwrap(), "yes");
    }

    #[test]
    fn test_contains_and_in() {
        let e = edge(vec![("tags", Operator::Contains, json!("urgent"), "fast")], "slow");
        assert_eq!(evaluate(&e, &state(json!({"tags": ["urgent", "bug"]}))).unwrap(), "fast");
        assert_eq!(evaluate(&e, &state(json!({"tags": "not urgent at all"}))).unwrap(), "fast");
        assert_eq!(evaluate(&e, &state(json!({"tags": {"urgent": 1}}))).unwrap(), "fast");
        assert_eq!(evaluate(&e, &state(json!({"tags": ["bug"]}))).unwrap(), "slow");

        let e = edge(vec![("lang", Operator::In, json!(["rust", "go"]), "compiled")], "other");
        assert_eq!(evaluate(&e, &state(json!({"lang": "rust"}))).unwrap(), "compiled");
        assert_eq!(evaluate(&e, &state(json!({"lang": "python"}))).unwrap(), "other");

        let e = edge(vec![("lang", Operator::NotContains, json!("x"), "A")], "B");
        assert!(evaluate(&e, &state(json!({"lang": 42}))).is_err());
    }

    #[test]
    fn test_field_paths() {
        let e = edge(
            vec![("custom_metadata.review.quality_score", Operator::GreaterOrEqual, json!(8), "publish")],
            "revise",
        );
        let s = state(json!({"review": {"quality_score": 8}}));
        assert_eq!(evaluate(&e, &s).unwrap(), "publish");

        let e = edge(vec![("custom_metadata.has_error", Operator::Equals, json!(true), "fix")], "next");
        assert_eq!(evaluate(&e, &state(json!({"has_error": true}))).unwrap(), "fix");
    }
}
