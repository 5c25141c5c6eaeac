//! Structural checks over a parsed JSON body.
//!
//! # Responsibilities
//! - Bound payload size and nesting depth
//! - Detect prototype pollution and NoSQL operator keys
//! - Bound batch operation counts and vet each operation
//!
//! # Design Decisions
//! - Pure functions over `serde_json::Value`; an empty list means pass
//! - Size and depth failures return immediately, later checks accumulate
//! - Recursion is hard-capped so hostile nesting cannot exhaust the stack

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::security::patterns;
use crate::security::types::{ShieldError, ViolationCode};

pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
pub const MAX_DEPTH: usize = 10;
pub const MAX_BATCH_OPERATIONS: usize = 100;
const DEPTH_CAP: usize = 15;

/// How prototype pollution is detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollutionStrategy {
    /// Search the serialized text for the quoted pollution keys.
    #[default]
    StringScan,
    /// Walk the value and compare object keys literally.
    StrictWalk,
}

/// Nesting depth of objects and arrays. Scalars have depth 0.
///
/// Measurement stops once `DEPTH_CAP` is reached.
pub fn depth(value: &Value) -> usize {
    measure(value, 0)
}

fn measure(value: &Value, level: usize) -> usize {
    if level >= DEPTH_CAP {
        return level;
    }
    match value {
        Value::Object(map) => map
            .values()
            .map(|child| measure(child, level + 1))
            .fold(level + 1, usize::max),
        Value::Array(items) => items
            .iter()
            .map(|child| measure(child, level + 1))
            .fold(level + 1, usize::max),
        _ => level,
    }
}

fn has_pollution(value: &Value, serialized: &str, strategy: PollutionStrategy) -> bool {
    match strategy {
        PollutionStrategy::StringScan => patterns::POLLUTION_KEYS
            .iter()
            .any(|key| serialized.contains(&format!("\"{key}\""))),
        PollutionStrategy::StrictWalk => any_key(value, 0, &patterns::is_pollution_key),
    }
}

fn any_key(value: &Value, level: usize, predicate: &dyn Fn(&str) -> bool) -> bool {
    if level > DEPTH_CAP {
        return false;
    }
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(key, child)| predicate(key) || any_key(child, level + 1, predicate)),
        Value::Array(items) => items.iter().any(|child| any_key(child, level + 1, predicate)),
        _ => false,
    }
}

fn push_unique(violations: &mut Vec<ViolationCode>, code: ViolationCode) {
    if !violations.contains(&code) {
        violations.push(code);
    }
}

fn batch_entries(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get("operations").and_then(Value::as_array),
        _ => None,
    }
}

/// Run every structural check against a parsed body.
pub fn validate_structure(
    value: &Value,
    strategy: PollutionStrategy,
) -> Result<Vec<ViolationCode>, ShieldError> {
    let serialized = serde_json::to_string(value)?;

    if serialized.len() > MAX_PAYLOAD_BYTES {
        return Ok(vec![ViolationCode::PayloadTooLarge]);
    }

    if depth(value) > MAX_DEPTH {
        return Ok(vec![ViolationCode::ExcessiveNesting]);
    }

    let mut violations = Vec::new();

    if has_pollution(value, &serialized, strategy) {
        violations.push(ViolationCode::PrototypePollution);
    }

    if any_key(value, 0, &patterns::is_nosql_operator_key) {
        push_unique(&mut violations, ViolationCode::NosqlInjectionOperator);
    }
    if any_key(value, 0, &patterns::is_dangerous_function_key) {
        push_unique(&mut violations, ViolationCode::NosqlInjectionFunction);
    }

    if let Some(entries) = batch_entries(value) {
        if entries.len() > MAX_BATCH_OPERATIONS {
            push_unique(&mut violations, ViolationCode::BatchTooLarge);
        }
        for entry in entries {
            if let Some(code) = validate_query_object(entry)? {
                push_unique(&mut violations, code);
            }
        }
    }

    Ok(violations)
}

/// Vet a single query object for operator and code-execution smuggling.
///
/// Scalars and `null` are always safe.
pub fn validate_query_object(value: &Value) -> Result<Option<ViolationCode>, ShieldError> {
    let Value::Object(map) = value else {
        return Ok(None);
    };

    let serialized = serde_json::to_string(value)?;

    if let Some(op) = patterns::find_nosql_operator(&serialized) {
        tracing::debug!(operator = op, "Query object carries an operator token");
        return Ok(Some(ViolationCode::NosqlInjectionOperator));
    }

    if let Some(ident) = patterns::find_dangerous_identifier(&serialized) {
        tracing::debug!(identifier = ident, "Query object carries a dangerous identifier");
        return Ok(Some(ViolationCode::NosqlInjectionFunction));
    }

    if suspicious_keys(map, 0) {
        return Ok(Some(ViolationCode::NosqlInjectionOperator));
    }

    Ok(None)
}

fn suspicious_keys(map: &Map<String, Value>, level: usize) -> bool {
    if level > MAX_DEPTH {
        return true;
    }
    map.iter().any(|(key, child)| {
        key.starts_with('$')
            || key.contains('.')
            || match child {
                Value::Object(inner) => suspicious_keys(inner, level + 1),
                Value::Array(items) => items.iter().any(|item| match item {
                    Value::Object(inner) => suspicious_keys(inner, level + 1),
                    _ => false,
                }),
                _ => false,
            }
    })
}
