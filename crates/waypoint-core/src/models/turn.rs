//! Turn responses and history entries.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{OperationRequest, OperationResult, Plan, StepId, StepStatus};
use crate::error::OperationError;

/// Why a turn was answered without touching the plan machinery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectReason {
    /// The complexity policy judged the input simple
    NotComplex,
    /// The planner produced no actionable steps
    EmptyPlan,
    /// The planner failed or its output could not be normalized
    PlanGenerationFailed(OperationError),
}

/// Final state of one step, assembled when a plan completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: StepId,
    pub action: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

/// What a turn produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnResponse {
    /// Answer conversationally; no plan involved
    DirectAnswer { reason: DirectReason },
    /// A fresh plan was stored; nothing ran this turn
    PlanCreated { plan: Plan, warnings: Vec<String> },
    /// Run this request; the step is now processing
    Execute {
        step_id: StepId,
        request: OperationRequest,
        version: u64,
    },
    /// The dispatched step finished successfully
    StepFinished {
        step_id: StepId,
        result: OperationResult,
    },
    /// The step failed, either in the executor or before dispatch
    StepFailed {
        step_id: StepId,
        error: OperationError,
    },
    /// A linear chain of steps ran as one sequence
    ChainFinished {
        steps: Vec<StepId>,
        results: Vec<OperationResult>,
    },
    /// A step is still processing; nothing else may happen yet
    AwaitingStep { step_id: StepId },
    /// No rate-limit token for the next step; it stays pending
    RateLimited { step_id: StepId, retry_after_ms: u64 },
    /// Nothing can run: failed steps (and the steps stuck behind them)
    PlanBlocked {
        failed: Vec<StepId>,
        stalled: Vec<StepId>,
    },
    /// Every step is done or skipped
    PlanComplete { results: Vec<StepOutcome> },
    /// The turn was cancelled; the step's result will be recorded as abandoned
    Cancelled { step_id: StepId },
}

impl TurnResponse {
    /// Stable snake_case name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnResponse::DirectAnswer { .. } => "direct_answer",
            TurnResponse::PlanCreated { .. } => "plan_created",
            TurnResponse::Execute { .. } => "execute",
            TurnResponse::StepFinished { .. } => "step_finished",
            TurnResponse::StepFailed { .. } => "step_failed",
            TurnResponse::ChainFinished { .. } => "chain_finished",
            TurnResponse::AwaitingStep { .. } => "awaiting_step",
            TurnResponse::RateLimited { .. } => "rate_limited",
            TurnResponse::PlanBlocked { .. } => "plan_blocked",
            TurnResponse::PlanComplete { .. } => "plan_complete",
            TurnResponse::Cancelled { .. } => "cancelled",
        }
    }

    /// One-line description kept in the history.
    pub fn summary(&self) -> String {
        match self {
            TurnResponse::DirectAnswer { reason } => match reason {
                DirectReason::NotComplex => "direct answer".to_string(),
                DirectReason::EmptyPlan => "direct answer (empty plan)".to_string(),
                DirectReason::PlanGenerationFailed(error) => {
                    format!("direct answer (plan generation failed: {error})")
                }
            },
            TurnResponse::PlanCreated { plan, .. } => {
                format!("plan created with {} steps", plan.steps.len())
            }
            TurnResponse::Execute { step_id, .. } => format!("dispatched {step_id}"),
            TurnResponse::StepFinished { step_id, result } => {
                format!("{step_id} {}", result.status.as_str())
            }
            TurnResponse::StepFailed { step_id, error } => format!("{step_id} failed: {error}"),
            TurnResponse::ChainFinished { steps, .. } => format!("chain of {} steps ran", steps.len()),
            TurnResponse::AwaitingStep { step_id } => format!("awaiting {step_id}"),
            TurnResponse::RateLimited {
                step_id,
                retry_after_ms,
            } => format!("{step_id} rate limited, retry in {retry_after_ms}ms"),
            TurnResponse::PlanBlocked { failed, .. } => format!("plan blocked by {}", join(failed)),
            TurnResponse::PlanComplete { results } => {
                format!("plan complete ({} steps)", results.len())
            }
            TurnResponse::Cancelled { step_id } => format!("cancelled while {step_id} ran"),
        }
    }
}

fn join(ids: &[StepId]) -> String {
    ids.iter()
        .map(StepId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One entry of a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub session_id: String,
    pub input: String,
    /// Variant name of the response
    pub kind: String,
    /// One-line description of the response
    pub summary: String,
    pub created_at: Timestamp,
}

impl Turn {
    pub fn new(session_id: &str, input: &str, response: &TurnResponse) -> Self {
        Self {
            session_id: session_id.to_string(),
            input: input.to_string(),
            kind: response.kind().to_string(),
            summary: response.summary(),
            created_at: Timestamp::now(),
        }
    }
}
