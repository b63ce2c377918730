//! Parameter structures shared by the engine's front ends.
//!
//! These carry no framework derives beyond serde; interface layers (the CLI)
//! wrap them with their own derives and convert via `From`. JSON schema
//! derives are available behind the `schema` feature.
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   CLI Args      │───▶│  Core Params    │───▶│    Handlers     │
//! │  (clap derives) │    │ (minimal deps)  │    │  (crate::handlers)
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```

#[cfg(feature = "schema")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Operations that only need a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct Session {
    /// Session whose plan or history to operate on
    pub session_id: String,
}

/// Parameters for discarding a session's plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct DiscardPlan {
    pub session_id: String,
    /// Discard even while a step is processing
    #[serde(default)]
    pub force: bool,
}

/// Parameters for running one conversational turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct RunTurn {
    pub session_id: String,
    /// The user's message for this turn
    pub input: String,
    /// Run a linear chain of steps as one sequence instead of a single step
    #[serde(default)]
    pub chain: bool,
}

/// Parameters for normalizing planner output without storing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct CheckPlan {
    /// Raw planner output: JSON steps or the line language
    pub source: String,
    /// Steps without `after` depend on the previous step
    #[serde(default = "default_implicit_dependencies")]
    pub implicit_dependencies: bool,
}

fn default_implicit_dependencies() -> bool {
    true
}
