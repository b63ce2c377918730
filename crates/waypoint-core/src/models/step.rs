//! Plan step model definition and related functionality.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ResultRef, StepStatus};
use crate::error::{EngineError, OperationError, Result};

/// Strongly-typed step identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StepId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// "Output of step `from` at `path`".
///
/// The path is dot-separated; numeric segments index into arrays. A missing
/// path refers to the whole payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    #[serde(rename = "$ref")]
    pub from: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Reference {
    pub fn new(from: impl Into<StepId>, path: Option<&str>) -> Self {
        Self {
            from: from.into(),
            path: path.filter(|p| !p.is_empty()).map(String::from),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "@{}.{}", self.from, path),
            None => write!(f, "@{}", self.from),
        }
    }
}

/// A step or item parameter: either a literal JSON value or a reference to
/// another step's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Reference(Reference),
    Literal(Value),
}

impl ParamValue {
    /// Interpret a raw JSON value, recognising the `{"$ref": ..}` shape.
    pub fn from_json(value: Value) -> Self {
        match serde_json::from_value::<Reference>(value.clone()) {
            Ok(reference) => ParamValue::Reference(reference),
            Err(_) => ParamValue::Literal(value),
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            ParamValue::Reference(reference) => Some(reference),
            ParamValue::Literal(_) => None,
        }
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        ParamValue::Literal(value)
    }
}

impl From<Reference> for ParamValue {
    fn from(reference: Reference) -> Self {
        ParamValue::Reference(reference)
    }
}

/// Parameter map of a step or operation item.
pub type Params = BTreeMap<String, ParamValue>;

/// Represents an individual step within a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    /// Identifier, unique within the plan
    pub id: StepId,

    /// Registered action this step runs
    pub action: String,

    /// Parameters; values may reference other steps' outputs
    #[serde(default)]
    pub params: Params,

    /// Current status of the step
    #[serde(default)]
    pub status: StepStatus,

    /// Steps that must be done before this one may run
    #[serde(default)]
    pub dependencies: BTreeSet<StepId>,

    /// Handle to the payload in the result store (never the payload itself)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<ResultRef>,

    /// Why the step failed or was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,

    /// First time admission was refused by the rate limiter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited_since: Option<Timestamp>,

    /// When the step last moved to processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_since: Option<Timestamp>,

    /// The turn that dispatched this step was cancelled before the result
    /// was consumed
    #[serde(default)]
    pub abandoned: bool,
}

impl PlanStep {
    /// Creates a pending step with no parameters or dependencies.
    pub fn new(id: impl Into<StepId>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            params: Params::new(),
            status: StepStatus::Pending,
            dependencies: BTreeSet::new(),
            result_ref: None,
            error: None,
            rate_limited_since: None,
            processing_since: None,
            abandoned: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<StepId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    /// Moves the step to `next`, refusing anything but a forward transition.
    pub fn transition(&mut self, next: StepStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                step_id: self.id.to_string(),
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// References held in this step's parameters.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.params.values().filter_map(ParamValue::as_reference)
    }
}
