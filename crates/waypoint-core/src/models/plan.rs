//! Plan model definition and related functionality.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::{PlanStep, StepId, StepStatus};
use crate::error::{EngineError, Result};

/// The versioned, ordered step list owned by a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    /// Session that owns the plan
    pub session_id: String,

    /// Optimistic concurrency token; bumped by every persisted write
    #[serde(default)]
    pub version: u64,

    /// The user input the plan was generated for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    /// Steps in plan order
    #[serde(default)]
    pub steps: Vec<PlanStep>,

    /// Timestamp when the plan was created (UTC)
    pub created_at: Timestamp,

    /// Timestamp when the plan was last modified (UTC)
    pub updated_at: Timestamp,
}

impl Plan {
    /// An empty, never-persisted plan for `session_id`.
    pub fn empty(session_id: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            session_id: session_id.into(),
            version: 0,
            goal: None,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A plan with steps counts as usable; an empty one means "no plan".
    pub fn is_usable(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn step(&self, id: &StepId) -> Option<&PlanStep> {
        self.steps.iter().find(|step| &step.id == id)
    }

    pub fn step_mut(&mut self, id: &StepId) -> Result<&mut PlanStep> {
        self.steps
            .iter_mut()
            .find(|step| &step.id == id)
            .ok_or_else(|| EngineError::StepNotFound { id: id.to_string() })
    }

    /// Index of the step in plan order.
    pub fn position(&self, id: &StepId) -> Option<usize> {
        self.steps.iter().position(|step| &step.id == id)
    }

    /// The step currently dispatched, if any.
    pub fn processing_step(&self) -> Option<&PlanStep> {
        self.steps
            .iter()
            .find(|step| step.status == StepStatus::Processing)
    }

    fn dependencies_done(&self, step: &PlanStep) -> bool {
        step.dependencies.iter().all(|dep| {
            self.step(dep)
                .is_some_and(|dep| dep.status == StepStatus::Done)
        })
    }

    /// Indices of pending steps whose dependencies are all done, in plan order.
    pub fn frontier(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.status == StepStatus::Pending && self.dependencies_done(step))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn has_failed(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.status == StepStatus::Failed)
    }

    pub fn failed_steps(&self) -> Vec<StepId> {
        self.steps_with(StepStatus::Failed)
    }

    /// Pending steps that can never run because a dependency ended without
    /// succeeding.
    pub fn stalled_steps(&self) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Pending && !self.dependencies_done(step))
            .map(|step| step.id.clone())
            .collect()
    }

    fn steps_with(&self, status: StepStatus) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|step| step.status == status)
            .map(|step| step.id.clone())
            .collect()
    }

    /// Every step is done or skipped.
    pub fn is_complete(&self) -> bool {
        self.is_usable()
            && self
                .steps
                .iter()
                .all(|step| matches!(step.status, StepStatus::Done | StepStatus::Skipped))
    }

    /// Replaces the whole step list; the plan is never partially overwritten.
    pub fn replace_steps(&mut self, goal: Option<String>, steps: Vec<PlanStep>) {
        let now = Timestamp::now();
        self.goal = goal;
        self.steps = steps;
        self.created_at = now;
        self.updated_at = now;
    }

    /// Drops every step, leaving an empty (unusable) plan.
    pub fn clear(&mut self) {
        self.goal = None;
        self.steps.clear();
        self.updated_at = Timestamp::now();
    }

    pub fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }
}
