//! Tool registry: the closed set of actions the executor may run.
//!
//! The registry is assembled once through [`ToolRegistryBuilder`] and is
//! read-only afterwards. Actions named by a planner are resolved to either a
//! known tool or an explicit [`Action::Unknown`], which fails into the error
//! taxonomy instead of being dispatched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;

use crate::error::{EngineError, Result};

/// Category used when a tool does not name one.
pub const DEFAULT_CATEGORY: &str = "default";

/// Static description of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    /// Action name the planner uses
    pub name: String,
    /// Groups tools for cache TTL configuration
    pub category: String,
    /// Safe to run twice with the same params; non-idempotent tools are never
    /// cached and their timeouts are not retried
    pub idempotent: bool,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: DEFAULT_CATEGORY.to_string(),
            idempotent: true,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }
}

/// How a tool failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    /// May succeed if retried
    Transient,
    /// Will not succeed if retried
    Permanent,
}

/// Failure reported by a tool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Permanent,
            message: message.into(),
        }
    }
}

/// A tool the executor can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Rejects malformed parameters before anything runs.
    fn validate(&self, _params: &Map<String, Value>) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Runs the tool. The executor also enforces `deadline`; tools doing long
    /// work may use it to stop early.
    async fn execute(
        &self,
        params: Map<String, Value>,
        deadline: Instant,
    ) -> std::result::Result<Value, ToolError>;
}

/// Result of looking up an action name.
#[derive(Clone)]
pub enum Action {
    Known(Arc<dyn Tool>),
    Unknown(String),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Known(tool) => f.debug_tuple("Known").field(&tool.spec().name).finish(),
            Action::Unknown(name) => f.debug_tuple("Unknown").field(name).finish(),
        }
    }
}

/// Frozen map of action name to tool.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<HashMap<String, (ToolSpec, Arc<dyn Tool>)>>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn resolve(&self, action: &str) -> Action {
        match self.tools.get(action) {
            Some((_, tool)) => Action::Known(Arc::clone(tool)),
            None => Action::Unknown(action.to_string()),
        }
    }

    pub fn spec(&self, action: &str) -> Option<&ToolSpec> {
        self.tools.get(action).map(|(spec, _)| spec)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.tools.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}

/// Collects tools before freezing them into a [`ToolRegistry`].
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: HashMap<String, (ToolSpec, Arc<dyn Tool>)>,
    duplicates: Vec<String>,
}

impl ToolRegistryBuilder {
    pub fn register<T: Tool + 'static>(self, tool: T) -> Self {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        let spec = tool.spec();
        if self.tools.contains_key(&spec.name) {
            self.duplicates.push(spec.name);
        } else {
            self.tools.insert(spec.name.clone(), (spec, tool));
        }
        self
    }

    /// Freezes the registry.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` if two tools share a name.
    pub fn build(self) -> Result<ToolRegistry> {
        if !self.duplicates.is_empty() {
            return Err(EngineError::configuration(format!(
                "duplicate tool registrations: {}",
                self.duplicates.join(", ")
            )));
        }
        Ok(ToolRegistry {
            tools: Arc::new(self.tools),
        })
    }
}
