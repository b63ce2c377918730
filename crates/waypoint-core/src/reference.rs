//! Parameter reference resolution shared by plan steps and sequence items.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::OperationError;
use crate::models::{ParamValue, Params, Reference, StepId};

/// Walks a dot-separated path into `value`. Numeric segments index arrays;
/// an empty path returns the value itself.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Resolves a single reference against the available outputs.
pub fn resolve(
    reference: &Reference,
    outputs: &HashMap<StepId, Value>,
) -> Result<Value, OperationError> {
    let output = outputs.get(&reference.from).ok_or_else(|| {
        OperationError::dependency_unresolved(format!(
            "'{}' has no output to reference",
            reference.from
        ))
    })?;
    let path = reference.path.as_deref().unwrap_or_default();
    lookup_path(output, path).cloned().ok_or_else(|| {
        OperationError::dependency_unresolved(format!(
            "path '{path}' not found in output of '{}'",
            reference.from
        ))
    })
}

/// Replaces every reference in `params` with the value it points at.
pub fn substitute(
    params: &Params,
    outputs: &HashMap<StepId, Value>,
) -> Result<Map<String, Value>, OperationError> {
    params
        .iter()
        .map(|(key, value)| {
            let resolved = match value {
                ParamValue::Literal(literal) => literal.clone(),
                ParamValue::Reference(reference) => resolve(reference, outputs)?,
            };
            Ok((key.clone(), resolved))
        })
        .collect()
}

/// Whether any parameter is a reference.
pub fn has_references(params: &Params) -> bool {
    params.values().any(|value| value.as_reference().is_some())
}
