//! Error types for the engine.
//!
//! Two layers live here. [`EngineError`] is the hard-fault type: storage
//! failures, misconfiguration, invariant violations. It is propagated with `?`
//! and aborts the current turn. [`OperationError`] is the structured,
//! per-operation error that travels inside results and plan steps and is never
//! thrown across the plan boundary.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard faults raised by the engine and its collaborators.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Database connection or query errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: rusqlite::Error,
    },
    /// File system operation errors
    #[error("File system error at path '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },
    /// XDG directory specification errors
    #[error("XDG directory error: {0}")]
    XdgDirectory(String),
    /// Invalid input validation errors
    #[error("Invalid input for field '{field}': {reason}")]
    InvalidInput { field: String, reason: String },
    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    /// Configuration errors, including registry misconfiguration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
    /// Another writer saved the plan since it was loaded
    #[error("Plan for session '{session_id}' changed concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        session_id: String,
        expected: u64,
        found: u64,
    },
    /// A step status change that would move backwards or skip a state
    #[error("Step '{step_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        step_id: String,
        from: String,
        to: String,
    },
    /// Step not found in the plan
    #[error("Step '{id}' not found in plan")]
    StepNotFound { id: String },
    /// A result handle that the result store does not know
    #[error("Result '{reference}' not found in result store")]
    ResultNotFound { reference: String },
    /// A spawned execution task panicked or was cancelled by the runtime
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Builder for creating database errors with optional context.
pub struct DatabaseErrorBuilder {
    message: String,
}

impl DatabaseErrorBuilder {
    /// Create a new database error builder with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build the error with the given source.
    pub fn with_source(self, source: rusqlite::Error) -> EngineError {
        EngineError::Database {
            message: self.message,
            source,
        }
    }
}

/// Builder for creating input validation errors.
pub struct InvalidInputBuilder {
    field: String,
}

impl InvalidInputBuilder {
    /// Create a new invalid input error builder for a field.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// Build the error with the given reason.
    pub fn with_reason(self, reason: impl Into<String>) -> EngineError {
        EngineError::InvalidInput {
            field: self.field,
            reason: reason.into(),
        }
    }
}

impl EngineError {
    /// Creates a builder for database errors.
    pub fn database(message: impl Into<String>) -> DatabaseErrorBuilder {
        DatabaseErrorBuilder::new(message)
    }

    /// Creates a builder for input validation errors.
    pub fn invalid_input(field: impl Into<String>) -> InvalidInputBuilder {
        InvalidInputBuilder::new(field)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        EngineError::Configuration {
            message: message.into(),
        }
    }
}

/// Extension trait for Result to provide concise error mapping with
/// anyhow-style context.
pub trait ResultExt<T, E> {
    /// Add context to any error type, converting to EngineError.
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static;

    /// Add lazy context to any error type, converting to EngineError.
    fn with_context_lazy<C, F>(self, f: F) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

/// Specialized extension trait for database-related Results.
pub trait DatabaseResultExt<T> {
    /// Map database errors with a message.
    fn db_context(self, message: &str) -> Result<T>;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| EngineError::Configuration {
            message: format!("{}: {}", context, e),
        })
    }

    fn with_context_lazy<C, F>(self, f: F) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| EngineError::Configuration {
            message: format!("{}: {}", f(), e),
        })
    }
}

impl<T> DatabaseResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn db_context(self, message: &str) -> Result<T> {
        self.map_err(|e| EngineError::database(message).with_source(e))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Classification of a failed operation or plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The planner produced nothing usable
    PlanGeneration,
    /// The planner output could not be normalized
    PlanParse,
    /// A parameter reference could not be satisfied before dispatch
    DependencyUnresolved,
    /// No rate-limit token within the allowed wait
    RateLimited,
    /// The tool reported a failure that may succeed on retry
    Transient,
    /// The call exceeded its deadline
    Timeout,
    /// The tool reported a failure that will not succeed on retry
    Permanent,
    /// The action is not in the tool registry
    UnknownAction,
    /// The tool rejected the parameters
    InvalidParams,
    /// Not run because an earlier item in the sequence failed
    Skipped,
    /// The executing task went away without publishing an outcome
    Abandoned,
}

impl ErrorKind {
    /// Stable snake_case name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PlanGeneration => "plan_generation",
            ErrorKind::PlanParse => "plan_parse",
            ErrorKind::DependencyUnresolved => "dependency_unresolved",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Permanent => "permanent",
            ErrorKind::UnknownAction => "unknown_action",
            ErrorKind::InvalidParams => "invalid_params",
            ErrorKind::Skipped => "skipped",
            ErrorKind::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried by operation results and plan steps.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct OperationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A reference that could not be resolved before dispatch.
    pub fn dependency_unresolved(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyUnresolved, message)
    }

    /// The action is not registered.
    pub fn unknown_action(action: &str) -> Self {
        Self::new(ErrorKind::UnknownAction, format!("no tool registered for '{action}'"))
    }

    /// The item was not run because an earlier sequence item failed.
    pub fn skipped(after: &str) -> Self {
        Self::new(ErrorKind::Skipped, format!("not run: '{after}' failed earlier in the sequence"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::DependencyUnresolved).unwrap();
        assert_eq!(json, "\"dependency_unresolved\"");
        assert_eq!(ErrorKind::RateLimited.as_str(), "rate_limited");
    }

    #[test]
    fn test_operation_error_display() {
        let error = OperationError::unknown_action("teleport");
        assert_eq!(error.to_string(), "unknown_action: no tool registered for 'teleport'");
    }

    #[test]
    fn test_builders() {
        let error = EngineError::invalid_input("session_id").with_reason("must not be empty");
        assert!(matches!(error, EngineError::InvalidInput { .. }));
        assert!(error.to_string().contains("session_id"));

        let error = EngineError::configuration("bad rate");
        assert_eq!(error.to_string(), "Configuration error: bad rate");
    }
}
