//! `{placeholder}` substitution.
//!
//! A placeholder names either a prior node's output or a workflow parameter,
//! optionally followed by a dot path into structured data:
//!
//! - `{topic}` parameter
//! - `{draft}` raw output of node `draft`
//! - `{search.items.0.title}` path into a JSON output (string outputs are
//!   parsed as JSON when a path is given)
//!
//! Node outputs win over parameters with the same name. Placeholders that
//! resolve to nothing are left verbatim.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::warn;

use weft_core::types::{value_to_text, Params};

use crate::state::ExecutionState;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\}")
            .expect("placeholder pattern is valid")
    })
}

/// Read-only view over the values a placeholder can refer to.
pub struct VariableResolver<'a> {
    params: &'a Params,
    outputs: &'a Map<String, Value>,
}

impl<'a> VariableResolver<'a> {
    pub fn new(params: &'a Params, outputs: &'a Map<String, Value>) -> Self {
        Self { params, outputs }
    }

    pub fn from_state(state: &'a ExecutionState) -> Self {
        Self::new(&state.params, &state.node_outputs)
    }

    /// Look up a dotted name: node outputs first, then parameters.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut segments = name.split('.');
        let head = segments.next()?;
        let rest: Vec<&str> = segments.collect();

        self.outputs
            .get(head)
            .and_then(|v| traverse(v, &rest))
            .or_else(|| self.params.get(head).and_then(|v| traverse(v, &rest)))
    }

    /// Substitute every placeholder in a string.
    pub fn resolve_str(&self, template: &str) -> String {
        placeholder_re()
            .replace_all(template, |caps: &Captures| {
                let name = &caps[1];
                match self.lookup(name) {
                    Some(value) => value_to_text(&value),
                    None => {
                        warn!(placeholder = %name, "Unresolved placeholder left verbatim");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// Substitute placeholders inside a structured value, recursing into
    /// objects and arrays. A string that is exactly one placeholder is
    /// replaced by the referenced value itself, keeping its type.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_string_value(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve_string_value(&self, s: &str) -> Value {
        let trimmed = s.trim();
        if let Some(caps) = placeholder_re().captures(trimmed) {
            if caps[0].len() == trimmed.len() {
                if let Some(value) = self.lookup(&caps[1]) {
                    return parse_embedded_json(value);
                }
            }
        }
        Value::String(self.resolve_str(s))
    }
}

/// Walk a dot path. Strings are parsed as JSON when there is a path left
/// to follow; numeric segments index into arrays.
fn traverse(value: &Value, path: &[&str]) -> Option<Value> {
    let Some((segment, rest)) = path.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Object(map) => traverse(map.get(*segment)?, rest),
        Value::Array(items) => {
            let index: usize = segment.parse().ok()?;
            traverse(items.get(index)?, rest)
        }
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(strip_code_fence(s)).ok()?;
            match parsed {
                Value::Object(_) | Value::Array(_) => traverse(&parsed, path),
                _ => None,
            }
        }
        _ => None,
    }
}

/// A string holding a JSON array or object becomes that structure.
fn parse_embedded_json(value: Value) -> Value {
    if let Value::String(s) = &value {
        let body = strip_code_fence(s);
        if body.starts_with('[') || body.starts_with('{') {
            if let Ok(parsed @ (Value::Array(_) | Value::Object(_))) = serde_json::from_str::<Value>(body) {
                return parsed;
            }
        }
    }
    value
}

/// Agents often wrap JSON in a ```json fence.
fn strip_code_fence(s: &str) -> &str {
    let s = s.trim();
    match s.strip_prefix("```") {
        Some(inner) => {
            let inner = inner.strip_prefix("json").unwrap_or(inner);
            inner.strip_suffix("```").unwrap_or(inner).trim()
        }
        None => s,
    }
}
