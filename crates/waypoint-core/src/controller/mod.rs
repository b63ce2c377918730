//! The per-turn decision engine.
//!
//! [`ControllerDecisionEngine::decide`] looks at the user input and the
//! session's plan and decides what this turn does:
//!
//! ```text
//! step processing?  ──yes──▶ AwaitingStep (nothing else is evaluated)
//!        │no / stale: fail it as abandoned
//! regenerate?       ──yes──▶ discard plan ─┐
//!        │no                               │
//! usable plan?      ──no───▶ complex? ─────┴─▶ planner ▶ normalize ▶ PlanCreated
//!        │yes                   └─no──▶ DirectAnswer
//! frontier empty?   ──yes──▶ PlanComplete | PlanBlocked
//!        │no
//! select ▶ resolve ▶ admit ▶ processing ▶ Execute
//! ```
//!
//! The controller is the only component that moves a step from `pending` to
//! `processing`. Every plan mutation it makes is committed before it returns.

use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use log::{debug, info, warn};

pub mod policy;

pub use policy::{ComplexityPolicy, FrontierSelector, LowestIndex, RegenerationPolicy};

use crate::dispatcher::PlanStepDispatcher;
use crate::error::{EngineError, ErrorKind, OperationError, Result};
use crate::executor::{OperationExecutor, RetryDecision};
use crate::models::{DirectReason, Plan, StepId, StepStatus, TurnResponse};
use crate::normalizer::PlanNormalizer;
use crate::planner::{Planner, PlanningContext};
use crate::store::PlanStore;

pub struct ControllerDecisionEngine {
    pub(crate) plans: PlanStore,
    pub(crate) dispatcher: PlanStepDispatcher,
    pub(crate) executor: OperationExecutor,
    pub(crate) normalizer: PlanNormalizer,
    pub(crate) planner: Arc<dyn Planner>,
    pub(crate) complexity: Arc<dyn ComplexityPolicy>,
    pub(crate) regeneration: Arc<dyn RegenerationPolicy>,
    pub(crate) selector: Arc<dyn FrontierSelector>,
}

impl ControllerDecisionEngine {
    /// Decides one turn over `plan`, the session's current plan (empty if it
    /// has none). `plan` is updated in place and persisted.
    ///
    /// # Errors
    ///
    /// Store faults and `EngineError::VersionConflict` when another turn
    /// saved the plan first.
    pub async fn decide(&self, input: &str, plan: &mut Plan) -> Result<TurnResponse> {
        if let Some(step_id) = plan.processing_step().map(|step| step.id.clone()) {
            if !self.recover_stale(plan, &step_id).await? {
                debug!("'{step_id}' still processing; regeneration deferred");
                return Ok(TurnResponse::AwaitingStep { step_id });
            }
        }

        let mut previous = None;
        if plan.is_usable() && self.regeneration.should_regenerate(input, plan) {
            info!("regenerating plan for session '{}'", plan.session_id);
            previous = Some(plan.clone());
            self.plans.discard(plan).await?;
        }

        if !plan.is_usable() {
            return self.create_plan(input, plan, previous).await;
        }
        self.advance(plan).await
    }

    /// Fails a processing step whose executing turn is gone: it has been
    /// processing longer than any execution of the plan could take. Returns
    /// whether the step was failed.
    async fn recover_stale(&self, plan: &mut Plan, step_id: &StepId) -> Result<bool> {
        let stale_after = self.executor.stale_after(plan.steps.len());
        let step = plan.step_mut(step_id)?;
        let Some(since) = step.processing_since else {
            return Ok(false);
        };
        let elapsed =
            Duration::try_from(Timestamp::now().duration_since(since)).unwrap_or_default();
        if elapsed <= stale_after {
            return Ok(false);
        }

        warn!(
            "'{step_id}' processing for {}s with no result; failing it",
            elapsed.as_secs()
        );
        step.transition(StepStatus::Failed)?;
        step.abandoned = true;
        step.error = Some(OperationError::new(
            ErrorKind::Abandoned,
            format!("no result after {}ms of processing", elapsed.as_millis()),
        ));
        self.plans.commit(plan).await?;
        Ok(true)
    }

    async fn create_plan(
        &self,
        input: &str,
        plan: &mut Plan,
        previous: Option<Plan>,
    ) -> Result<TurnResponse> {
        if !self.complexity.is_complex(input) {
            return Ok(TurnResponse::DirectAnswer {
                reason: DirectReason::NotComplex,
            });
        }

        let context = PlanningContext {
            session_id: plan.session_id.clone(),
            history: self.plans.history(&plan.session_id).await?,
            previous,
            actions: self.executor.registry().actions(),
        };

        let raw = match self.planner.generate_plan(input, &context).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("planner failed: {e}");
                return Ok(generation_failed(OperationError::new(
                    ErrorKind::PlanGeneration,
                    e.to_string(),
                )));
            }
        };

        let normalized = match self.normalizer.normalize(raw) {
            Ok(normalized) => normalized,
            Err(e) => {
                warn!("planner output rejected: {e}");
                return Ok(generation_failed(e.into()));
            }
        };

        if normalized.steps.is_empty() {
            return Ok(TurnResponse::DirectAnswer {
                reason: DirectReason::EmptyPlan,
            });
        }

        self.plans
            .replace(plan, Some(input.to_string()), normalized.steps)
            .await?;
        info!(
            "plan created for session '{}' with {} steps (version {})",
            plan.session_id,
            plan.steps.len(),
            plan.version
        );
        Ok(TurnResponse::PlanCreated {
            plan: plan.clone(),
            warnings: normalized.warnings,
        })
    }

    async fn advance(&self, plan: &mut Plan) -> Result<TurnResponse> {
        let frontier = plan.frontier();
        if frontier.is_empty() {
            return self.finish(plan).await;
        }

        let index = self
            .selector
            .select(plan, &frontier)
            .filter(|index| frontier.contains(index))
            .ok_or_else(|| {
                EngineError::configuration("frontier selector returned no eligible step")
            })?;
        let step = plan.steps[index].clone();

        let resolved = match self.dispatcher.resolve_params(&step, plan).await? {
            Ok(resolved) => resolved,
            Err(error) => {
                self.dispatcher
                    .fail_before_dispatch(plan, &step.id, error.clone())?;
                self.plans.commit(plan).await?;
                return Ok(TurnResponse::StepFailed {
                    step_id: step.id,
                    error,
                });
            }
        };

        let admission = match self.executor.admit(&step.action).await {
            Ok(admission) => admission,
            Err(retry_after) => return self.rate_limited(plan, &step.id, retry_after).await,
        };

        let mut request = self.dispatcher.build_request(&step, resolved);
        request.items = request
            .items
            .into_iter()
            .map(|item| item.admitted(admission))
            .collect();

        let target = plan.step_mut(&step.id)?;
        target.transition(StepStatus::Processing)?;
        target.rate_limited_since = None;
        target.processing_since = Some(Timestamp::now());
        self.plans.commit(plan).await?;

        debug!("dispatching '{}' ({})", step.id, step.action);
        Ok(TurnResponse::Execute {
            step_id: step.id,
            request,
            version: plan.version,
        })
    }

    async fn rate_limited(
        &self,
        plan: &mut Plan,
        step_id: &StepId,
        retry_after: Duration,
    ) -> Result<TurnResponse> {
        let now = Timestamp::now();
        let step = plan.step_mut(step_id)?;
        let since = *step.rate_limited_since.get_or_insert(now);
        let waited = Duration::try_from(now.duration_since(since)).unwrap_or_default();

        match self
            .executor
            .retry_policy()
            .decide_wait(waited, retry_after)
        {
            RetryDecision::Retry { after } => {
                info!(
                    "'{step_id}' rate limited for {}ms so far; retry in {}ms",
                    waited.as_millis(),
                    after.as_millis()
                );
                self.plans.commit(plan).await?;
                Ok(TurnResponse::RateLimited {
                    step_id: step_id.clone(),
                    retry_after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                })
            }
            RetryDecision::GiveUp => {
                let error = OperationError::new(
                    ErrorKind::RateLimited,
                    format!("no rate-limit token within {}ms", waited.as_millis()),
                );
                self.dispatcher
                    .fail_before_dispatch(plan, step_id, error.clone())?;
                self.plans.commit(plan).await?;
                Ok(TurnResponse::StepFailed {
                    step_id: step_id.clone(),
                    error,
                })
            }
        }
    }

    /// Nothing is eligible: the plan either completed or is blocked.
    async fn finish(&self, plan: &mut Plan) -> Result<TurnResponse> {
        if plan.is_complete() {
            let results = self.dispatcher.outcomes(plan).await?;
            info!(
                "plan for session '{}' complete; clearing it",
                plan.session_id
            );
            self.plans.discard(plan).await?;
            return Ok(TurnResponse::PlanComplete { results });
        }

        let failed = plan.failed_steps();
        let stalled = plan.stalled_steps();
        info!(
            "plan for session '{}' blocked: {} failed, {} stalled",
            plan.session_id,
            failed.len(),
            stalled.len()
        );
        Ok(TurnResponse::PlanBlocked { failed, stalled })
    }
}

fn generation_failed(error: OperationError) -> TurnResponse {
    TurnResponse::DirectAnswer {
        reason: DirectReason::PlanGenerationFailed(error),
    }
}
