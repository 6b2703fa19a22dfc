//! Response validation rules attached to a test.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One assertion evaluated against a response.
///
/// Paths are dot-separated; numeric segments index into arrays
/// (`data.items.0.id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ValidationRule {
    /// Response status equals `value`
    Status { value: u16 },
    /// Body has a non-null value at `path`
    Exists { path: String },
    /// Body value at `path` equals `value`
    Equals { path: String, value: Value },
    /// Body value at `path` contains `value` (substring, array element, or object key)
    Contains { path: String, value: Value },
    /// Response header `name` is present, and equals `value` when given
    Header {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
}

/// Result of evaluating one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: ValidationRule,
    pub passed: bool,
    pub message: String,
}

/// The parts of a response the rules look at. Header names are lowercase.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    pub status: u16,
    pub headers: &'a BTreeMap<String, String>,
    pub body: &'a Value,
}

/// Resolves a dot-separated path inside a JSON value
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
        (Value::Array(items), n) => items.iter().any(|item| item == n),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn outcome(rule: &ValidationRule, passed: bool, message: String) -> RuleOutcome {
    RuleOutcome {
        rule: rule.clone(),
        passed,
        message,
    }
}

/// Evaluates a single rule
pub fn evaluate(rule: &ValidationRule, response: ResponseView<'_>) -> RuleOutcome {
    match rule {
        ValidationRule::Status { value } => {
            let passed = response.status == *value;
            outcome(
                rule,
                passed,
                format!("expected status {}, got {}", value, response.status),
            )
        }
        ValidationRule::Exists { path } => match lookup(response.body, path) {
            Some(v) if !v.is_null() => outcome(rule, true, format!("'{}' is present", path)),
            _ => outcome(rule, false, format!("'{}' is missing", path)),
        },
        ValidationRule::Equals { path, value } => match lookup(response.body, path) {
            Some(actual) if actual == value => {
                outcome(rule, true, format!("'{}' equals {}", path, value))
            }
            Some(actual) => outcome(
                rule,
                false,
                format!("'{}' expected {}, got {}", path, value, actual),
            ),
            None => outcome(rule, false, format!("'{}' is missing", path)),
        },
        ValidationRule::Contains { path, value } => match lookup(response.body, path) {
            Some(actual) if contains(actual, value) => {
                outcome(rule, true, format!("'{}' contains {}", path, value))
            }
            Some(_) => outcome(rule, false, format!("'{}' does not contain {}", path, value)),
            None => outcome(rule, false, format!("'{}' is missing", path)),
        },
        ValidationRule::Header { name, value } => {
            match (response.headers.get(&name.to_lowercase()), value) {
                (None, _) => outcome(rule, false, format!("header '{}' is missing", name)),
                (Some(_), None) => outcome(rule, true, format!("header '{}' is present", name)),
                (Some(actual), Some(expected)) if actual == expected => {
                    outcome(rule, true, format!("header '{}' equals '{}'", name, expected))
                }
                (Some(actual), Some(expected)) => outcome(
                    rule,
                    false,
                    format!("header '{}' expected '{}', got '{}'", name, expected, actual),
                ),
            }
        }
    }
}

/// Evaluates every rule in order
pub fn evaluate_all(rules: &[ValidationRule], response: ResponseView<'_>) -> Vec<RuleOutcome> {
    rules.iter().map(|rule| evaluate(rule, response)).collect()
}
