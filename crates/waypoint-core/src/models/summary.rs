//! Plan summary types and functionality.

use serde::{Deserialize, Serialize};

use super::{Plan, StepStatus};

/// Step counts per status for one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Session that owns the plan
    pub session_id: String,
    /// Plan version
    pub version: u64,
    /// Total number of steps
    pub total_steps: u32,
    pub pending_steps: u32,
    pub processing_steps: u32,
    pub done_steps: u32,
    pub failed_steps: u32,
    pub skipped_steps: u32,
}

impl From<&Plan> for PlanSummary {
    fn from(plan: &Plan) -> Self {
        let mut summary = Self {
            session_id: plan.session_id.clone(),
            version: plan.version,
            total_steps: plan.steps.len() as u32,
            ..Self::default()
        };
        for step in &plan.steps {
            match step.status {
                StepStatus::Pending => summary.pending_steps += 1,
                StepStatus::Processing => summary.processing_steps += 1,
                StepStatus::Done => summary.done_steps += 1,
                StepStatus::Failed => summary.failed_steps += 1,
                StepStatus::Skipped => summary.skipped_steps += 1,
            }
        }
        summary
    }
}
