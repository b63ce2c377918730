//! The planner collaborator.
//!
//! A [`Planner`] turns a goal into raw planner output. The engine never talks
//! to a language model itself; it only consumes whatever [`RawPlan`] a planner
//! hands back and normalizes it. Two reference planners ship with the crate:
//! [`FilePlanner`] reads the plan from disk, [`FixedPlanner`] returns a
//! canned answer.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Plan, Turn};
use crate::normalizer::RawPlan;

/// The planner could not produce a plan.
#[derive(Debug, Error)]
#[error("plan generation failed: {0:#}")]
pub struct PlanGenerationError(#[from] anyhow::Error);

/// What the planner may look at besides the goal.
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    pub session_id: String,
    /// Earlier turns of the session, oldest first
    pub history: Vec<Turn>,
    /// The plan being replaced, if this is a regeneration
    pub previous: Option<Plan>,
    /// Actions the registry knows; anything else aborts normalization
    pub actions: Vec<String>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn generate_plan(
        &self,
        goal: &str,
        context: &PlanningContext,
    ) -> Result<RawPlan, PlanGenerationError>;
}

/// Reads planner output from a file: JSON steps or the line language.
#[derive(Debug, Clone)]
pub struct FilePlanner {
    path: PathBuf,
}

impl FilePlanner {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Planner for FilePlanner {
    async fn generate_plan(
        &self,
        _goal: &str,
        _context: &PlanningContext,
    ) -> Result<RawPlan, PlanGenerationError> {
        let output = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read plan file {}", self.path.display()))?;
        Ok(RawPlan::from_planner_output(&output))
    }
}

/// Always answers with the same output.
#[derive(Debug, Clone)]
pub struct FixedPlanner {
    output: String,
}

impl FixedPlanner {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn generate_plan(
        &self,
        _goal: &str,
        _context: &PlanningContext,
    ) -> Result<RawPlan, PlanGenerationError> {
        Ok(RawPlan::from_planner_output(&self.output))
    }
}
