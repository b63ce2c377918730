//! Operation requests and results exchanged with the executor.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ItemStatus, ParamValue, Params};
use crate::error::OperationError;

/// Opaque handle to a payload held by the result store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(pub String);

impl ResultRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How the items of a request relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Exactly one item
    #[default]
    Single,
    /// Independent items on the shared worker pool
    Batch,
    /// Strict order; later items may reference earlier ones
    Sequence,
    /// Independent items under a caller-set concurrency ceiling
    Parallel,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Single => "single",
            Mode::Batch => "batch",
            Mode::Sequence => "sequence",
            Mode::Parallel => "parallel",
        }
    }
}

/// Proof that a rate-limit token was already taken for this item.
///
/// Only the executor hands these out, through
/// [`OperationExecutor::admit`](crate::executor::OperationExecutor::admit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission(pub(crate) ());

/// One unit of work inside a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationItem {
    /// Correlation id; plan steps use their step id. Sequence items reference
    /// each other by this id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub action: String,

    #[serde(default)]
    pub params: Params,

    #[serde(skip)]
    pub(crate) admission: Option<Admission>,
}

impl OperationItem {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            id: None,
            action: action.into(),
            params: Params::new(),
            admission: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Marks the item as already admitted by the rate limiter.
    pub fn admitted(mut self, admission: Admission) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Display label: the id if present, else the action.
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.action)
    }
}

/// Knobs for a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOptions {
    /// Concurrency ceiling for batch/parallel; falls back to the executor's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Sequence mode runs every item even after a failure
    #[serde(default)]
    pub continue_on_error: bool,

    /// Per-call deadline; falls back to the executor's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

/// A request to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    #[serde(default)]
    pub mode: Mode,
    pub items: Vec<OperationItem>,
    #[serde(default)]
    pub options: OperationOptions,
}

impl OperationRequest {
    pub fn single(item: OperationItem) -> Self {
        Self {
            mode: Mode::Single,
            items: vec![item],
            options: OperationOptions::default(),
        }
    }

    pub fn batch(items: Vec<OperationItem>) -> Self {
        Self {
            mode: Mode::Batch,
            items,
            options: OperationOptions::default(),
        }
    }

    pub fn sequence(items: Vec<OperationItem>) -> Self {
        Self {
            mode: Mode::Sequence,
            items,
            options: OperationOptions::default(),
        }
    }

    pub fn parallel(items: Vec<OperationItem>, max_parallel: usize) -> Self {
        Self {
            mode: Mode::Parallel,
            items,
            options: OperationOptions {
                max_parallel: Some(max_parallel),
                ..OperationOptions::default()
            },
        }
    }

    pub fn continue_on_error(mut self) -> Self {
        self.options.continue_on_error = true;
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.options.deadline_ms = Some(deadline_ms);
        self
    }
}

/// Outcome of one item, order-aligned with the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub action: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<ResultRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    pub duration_ms: u64,
    /// Tool invocations made for this item (0 for cache hits and rejects)
    pub attempts: u32,
    /// The item joined another caller's in-flight execution
    #[serde(default)]
    pub coalesced: bool,
}

impl OperationResult {
    pub(crate) fn for_item(item: &OperationItem, status: ItemStatus) -> Self {
        Self {
            item_id: item.id.clone(),
            action: item.action.clone(),
            status,
            payload_ref: None,
            error: None,
            duration_ms: 0,
            attempts: 0,
            coalesced: false,
        }
    }

    pub(crate) fn failed(item: &OperationItem, error: OperationError) -> Self {
        let mut result = Self::for_item(item, ItemStatus::Failed);
        result.error = Some(error);
        result
    }

    pub(crate) fn skipped(item: &OperationItem, after: &str) -> Self {
        let mut result = Self::for_item(item, ItemStatus::Skipped);
        result.error = Some(OperationError::skipped(after));
        result
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
