//! Template resolution for workflow step parameters.
//!
//! Step parameters may contain `${{ ... }}` expressions that are resolved
//! against the state of the running workflow:
//!
//! - `params.<name>` — runtime parameters supplied at instantiation
//! - `steps.<step>.<path>` — a prior step's stored result (dot paths,
//!   numeric array indices, optional leading `output` segment)
//! - `scratch.<key>` — workflow-scoped side-channel values such as job
//!   handles and thinking-session identifiers
//!
//! A string consisting of exactly one expression resolves to the referenced
//! JSON value, so numbers, arrays, and objects survive substitution; an
//! expression embedded in a longer string splices in its string rendering.
//! Unresolved expressions are left verbatim so they can be reported by
//! [`find_unresolved_references`] before a step runs.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Execution context for resolving step parameter templates.
#[derive(Debug, Default, Clone)]
pub struct RunContext {
    /// Runtime parameters supplied when the workflow was instantiated.
    pub params: Map<String, Value>,
    /// Stored results of completed steps, keyed by step name.
    pub steps: HashMap<String, Value>,
    /// Workflow-scoped side-channel values written by completed steps.
    pub scratch: HashMap<String, Value>,
}

/// Recursively resolves all template expressions in a JSON value.
pub fn interpolate_value(value: &Value, context: &RunContext) -> Value {
    match value {
        Value::String(text) => {
            if let Some(expression) = sole_expression(text)
                && let Some(resolved) = resolve_value(expression, context)
            {
                return resolved;
            }
            Value::String(interpolate_string(text, context))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, context))
                .collect(),
        ),
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (key, entry) in map {
                resolved.insert(key.clone(), interpolate_value(entry, context));
            }
            Value::Object(resolved)
        }
        _ => value.clone(),
    }
}

/// Extracts template expressions from a string, without delimiters.
pub fn extract_template_expressions(text: &str) -> Vec<String> {
    let mut expressions = Vec::new();
    let mut remainder = text;

    while let Some(start) = remainder.find("${{") {
        let after_start = &remainder[start + 3..];
        let Some(end) = after_start.find("}}") else {
            break;
        };
        let expression = after_start[..end].trim();
        if !expression.is_empty() {
            expressions.push(expression.to_string());
        }
        remainder = &after_start[end + 2..];
    }

    expressions
}

/// Walks a JSON value and reports every expression that does not resolve
/// against the context.
pub fn find_unresolved_references(value: &Value, context: &RunContext) -> Vec<String> {
    let mut unresolved = Vec::new();
    collect_unresolved(value, context, &mut unresolved);
    unresolved
}

fn collect_unresolved(value: &Value, context: &RunContext, unresolved: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for expression in extract_template_expressions(text) {
                if resolve_value(&expression, context).is_none() {
                    unresolved.push(expression);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_unresolved(item, context, unresolved);
            }
        }
        Value::Object(map) => {
            for entry in map.values() {
                collect_unresolved(entry, context, unresolved);
            }
        }
        _ => {}
    }
}

/// Substitutes `params.*` expressions at instantiation time, leaving
/// `steps.*` and `scratch.*` references deferred for the orchestrator.
pub fn apply_runtime_parameters(value: &Value, params: &Map<String, Value>) -> Value {
    let context = RunContext {
        params: params.clone(),
        ..RunContext::default()
    };
    match value {
        Value::String(text) => {
            if let Some(expression) = sole_expression(text)
                && expression.starts_with("params.")
                && let Some(resolved) = resolve_value(expression, &context)
            {
                return resolved;
            }
            Value::String(substitute_params_string(text, &context))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| apply_runtime_parameters(item, params))
                .collect(),
        ),
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (key, entry) in map {
                resolved.insert(key.clone(), apply_runtime_parameters(entry, params));
            }
            Value::Object(resolved)
        }
        _ => value.clone(),
    }
}

/// Navigates a dot path (with numeric array indices) into a payload.
///
/// An optional leading `output` segment is accepted for readability, as in
/// `steps.crawl.output.results`.
pub fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(items) => {
                let index = part.parse::<usize>().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Whether the whole string is exactly one template expression.
fn sole_expression(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix("${{")?.strip_suffix("}}")?;
    if inner.contains("${{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Replaces every resolvable expression with its string rendering;
/// unresolved expressions stay verbatim.
fn interpolate_string(text: &str, context: &RunContext) -> String {
    rewrite_expressions(text, |expression| {
        resolve_value(expression, context).map(|value| render(&value))
    })
}

/// Replaces only resolvable `params.*` expressions, leaving everything else
/// untouched for later resolution.
fn substitute_params_string(text: &str, context: &RunContext) -> String {
    rewrite_expressions(text, |expression| {
        if expression.starts_with("params.") {
            resolve_value(expression, context).map(|value| render(&value))
        } else {
            None
        }
    })
}

fn rewrite_expressions(text: &str, mut replace: impl FnMut(&str) -> Option<String>) -> String {
    let mut output = String::new();
    let mut remainder = text;

    while let Some(start) = remainder.find("${{") {
        let (before, rest) = remainder.split_at(start);
        output.push_str(before);

        let Some(end) = rest.find("}}") else {
            output.push_str(rest);
            return output;
        };
        let expression = rest[3..end].trim();
        match replace(expression) {
            Some(rendered) => output.push_str(&rendered),
            None => output.push_str(&rest[..end + 2]),
        }
        remainder = &rest[end + 2..];
    }

    output.push_str(remainder);
    output
}

/// Resolves an expression into the referenced JSON value.
fn resolve_value(expression: &str, context: &RunContext) -> Option<Value> {
    if let Some(rest) = expression.strip_prefix("params.") {
        let mut parts = rest.split('.');
        let name = parts.next()?;
        let root = context.params.get(name)?;
        return navigate(root, parts);
    }
    if let Some(rest) = expression.strip_prefix("steps.") {
        let mut parts = rest.split('.').peekable();
        let step_name = parts.next()?;
        let root = context.steps.get(step_name)?;
        // Allow an optional "output" segment for clarity.
        if parts.peek().copied() == Some("output") {
            parts.next();
        }
        return navigate(root, parts);
    }
    if let Some(rest) = expression.strip_prefix("scratch.") {
        let mut parts = rest.split('.');
        let key = parts.next()?;
        let root = context.scratch.get(key)?;
        return navigate(root, parts);
    }
    None
}

fn navigate<'a>(root: &Value, parts: impl Iterator<Item = &'a str>) -> Option<Value> {
    let mut current = root;
    for part in parts {
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(items) => {
                let index = part.parse::<usize>().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

/// String rendering used when an expression is embedded in a longer string.
fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
