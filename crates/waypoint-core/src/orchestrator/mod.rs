//! Per-turn driver.
//!
//! An [`Orchestrator`] wires the plan store, normalizer, dispatcher, executor
//! and controller together and runs one conversational turn at a time:
//!
//! ```text
//! load plan → decide → (Execute) run request in a spawned task → apply result → commit → history
//! ```
//!
//! Create one with [`EngineBuilder`].
//!
//! ```rust,no_run
//! use waypoint_core::{EngineBuilder, FixedPlanner, Plan, TurnResponse};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = EngineBuilder::new()
//!     .in_memory()
//!     .with_planner(FixedPlanner::new("fetch url=a\nsummarize text=@s1"))
//!     .with_complexity_policy(|input: &str| input.contains(" then "))
//!     .with_regeneration_policy(|input: &str, _plan: &Plan| input.starts_with("instead"))
//!     .build()
//!     .await?;
//!
//! let response = engine.run_turn("session-1", "fetch a then summarize it").await?;
//! assert!(matches!(response, TurnResponse::PlanCreated { .. }));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod builder;

pub use builder::EngineBuilder;

use crate::controller::ControllerDecisionEngine;
use crate::dispatcher::PlanStepDispatcher;
use crate::error::{EngineError, ErrorKind, OperationError, Result};
use crate::executor::OperationExecutor;
use crate::models::{
    OperationRequest, OperationResult, Plan, StepId, TurnResponse,
};
use crate::normalizer::PlanNormalizer;
use crate::store::PlanStore;

/// Cheap to clone; clones share stores, executor state and policies.
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<ControllerDecisionEngine>,
}

impl Orchestrator {
    pub(crate) fn new(engine: ControllerDecisionEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn plans(&self) -> &PlanStore {
        &self.engine.plans
    }

    pub fn executor(&self) -> &OperationExecutor {
        &self.engine.executor
    }

    pub fn normalizer(&self) -> &PlanNormalizer {
        &self.engine.normalizer
    }

    pub fn dispatcher(&self) -> &PlanStepDispatcher {
        &self.engine.dispatcher
    }

    /// Runs one turn to completion.
    ///
    /// # Errors
    ///
    /// Store faults, version conflicts and an empty session id.
    pub async fn run_turn(&self, session_id: &str, input: &str) -> Result<TurnResponse> {
        self.run_turn_cancellable(session_id, input, CancellationToken::new())
            .await
    }

    /// Runs one turn; if `cancel` fires while a step executes, returns
    /// [`TurnResponse::Cancelled`] at once. The execution itself carries on
    /// and its result is written to the plan marked `abandoned`.
    pub async fn run_turn_cancellable(
        &self,
        session_id: &str,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<TurnResponse> {
        let mut plan = self.load(session_id).await?;
        let decision = self.engine.decide(input, &mut plan).await?;

        let response = match decision {
            TurnResponse::Execute {
                step_id, request, ..
            } => {
                let task = tokio::spawn(self.clone().complete_step(
                    session_id.to_string(),
                    step_id.clone(),
                    request,
                    cancel.clone(),
                ));
                join_or_cancel(session_id, step_id, task, &cancel).await?
            }
            other => other,
        };

        self.engine
            .plans
            .record_turn(session_id, input, &response)
            .await?;
        Ok(response)
    }

    /// Like [`run_turn`](Self::run_turn), but when the selected step heads a
    /// linear chain (each next step depends only on the previous one), the
    /// whole chain runs as one sequence request. A failure skips the rest of
    /// the chain.
    pub async fn run_chain(&self, session_id: &str, input: &str) -> Result<TurnResponse> {
        self.run_chain_cancellable(session_id, input, CancellationToken::new())
            .await
    }

    /// [`run_chain`](Self::run_chain) with the cancellation behavior of
    /// [`run_turn_cancellable`](Self::run_turn_cancellable).
    pub async fn run_chain_cancellable(
        &self,
        session_id: &str,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<TurnResponse> {
        let mut plan = self.load(session_id).await?;
        let decision = self.engine.decide(input, &mut plan).await?;

        let response = match decision {
            TurnResponse::Execute {
                step_id, request, ..
            } => {
                let (steps, request) = self.extend_chain(&plan, &step_id, request).await?;
                let task = if steps.len() == 1 {
                    tokio::spawn(self.clone().complete_step(
                        session_id.to_string(),
                        step_id.clone(),
                        request,
                        cancel.clone(),
                    ))
                } else {
                    tokio::spawn(self.clone().complete_chain(
                        session_id.to_string(),
                        steps,
                        request,
                        cancel.clone(),
                    ))
                };
                join_or_cancel(session_id, step_id, task, &cancel).await?
            }
            other => other,
        };

        self.engine
            .plans
            .record_turn(session_id, input, &response)
            .await?;
        Ok(response)
    }

    async fn load(&self, session_id: &str) -> Result<Plan> {
        if session_id.trim().is_empty() {
            return Err(EngineError::invalid_input("session_id").with_reason("must not be empty"));
        }
        self.engine.plans.current(session_id).await
    }

    /// Appends the chain following `head` to its request. A step whose
    /// outside references cannot be resolved yet, or whose action has no
    /// rate-limit token right now, ends the chain early and stays pending.
    async fn extend_chain(
        &self,
        plan: &Plan,
        head: &StepId,
        mut request: OperationRequest,
    ) -> Result<(Vec<StepId>, OperationRequest)> {
        let dispatcher = &self.engine.dispatcher;
        let candidates = dispatcher.linear_chain(plan, head);
        let keep: BTreeSet<StepId> = candidates.iter().cloned().collect();

        let mut steps = vec![head.clone()];
        for step_id in candidates.iter().skip(1) {
            let step = plan.step(step_id).ok_or_else(|| EngineError::StepNotFound {
                id: step_id.to_string(),
            })?;
            let params = match dispatcher.resolve_params_except(step, plan, &keep).await? {
                Ok(params) => params,
                Err(error) => {
                    debug!("chain stops before '{step_id}': {error}");
                    break;
                }
            };
            let admission = match self.engine.executor.try_admit(&step.action) {
                Ok(admission) => admission,
                Err(retry_after) => {
                    debug!(
                        "chain stops before '{step_id}': rate limited for {}ms",
                        retry_after.as_millis()
                    );
                    break;
                }
            };
            request
                .items
                .push(dispatcher.build_item(step, params).admitted(admission));
            steps.push(step_id.clone());
        }

        if steps.len() > 1 {
            request = OperationRequest::sequence(request.items);
        }
        Ok((steps, request))
    }

    /// Runs a dispatched step and writes its result back.
    async fn complete_step(
        self,
        session_id: String,
        step_id: StepId,
        request: OperationRequest,
        cancel: CancellationToken,
    ) -> Result<TurnResponse> {
        let outcome = self.engine.executor.execute(request.clone()).await;
        let result = match outcome {
            Ok(results) => results.into_iter().next().ok_or_else(|| {
                EngineError::configuration("executor returned no result for a single request")
            })?,
            Err(e) => {
                warn!("executing '{step_id}' failed: {e}");
                self.fail_processing(&session_id, &step_id, &request, &e)
                    .await?;
                return Err(e);
            }
        };

        let dispatcher = &self.engine.dispatcher;
        let mut plan = self.engine.plans.current(&session_id).await?;
        if cancel.is_cancelled() {
            dispatcher.abandon(&mut plan, &step_id, &result)?;
        } else {
            dispatcher.apply_result(&mut plan, &step_id, &result)?;
        }
        self.engine.plans.commit(&mut plan).await?;

        Ok(match result.error.clone() {
            Some(error) if !result.is_success() => TurnResponse::StepFailed { step_id, error },
            _ => TurnResponse::StepFinished { step_id, result },
        })
    }

    async fn complete_chain(
        self,
        session_id: String,
        steps: Vec<StepId>,
        request: OperationRequest,
        cancel: CancellationToken,
    ) -> Result<TurnResponse> {
        let results = match self.engine.executor.execute(request.clone()).await {
            Ok(results) => results,
            Err(e) => {
                warn!("executing chain at '{}' failed: {e}", steps[0]);
                self.fail_processing(&session_id, &steps[0], &request, &e)
                    .await?;
                return Err(e);
            }
        };

        let mut plan = self.engine.plans.current(&session_id).await?;
        self.engine
            .dispatcher
            .apply_sequence(&mut plan, &steps, &results)?;
        if cancel.is_cancelled() {
            for step_id in &steps {
                plan.step_mut(step_id)?.abandoned = true;
            }
        }
        self.engine.plans.commit(&mut plan).await?;
        Ok(TurnResponse::ChainFinished { steps, results })
    }

    /// An infrastructure fault must not leave the step processing forever.
    async fn fail_processing(
        &self,
        session_id: &str,
        step_id: &StepId,
        request: &OperationRequest,
        cause: &EngineError,
    ) -> Result<()> {
        let Some(item) = request.items.first() else {
            return Ok(());
        };
        let result = OperationResult::failed(
            item,
            OperationError::new(ErrorKind::Abandoned, format!("execution aborted: {cause}")),
        );
        let mut plan = self.engine.plans.current(session_id).await?;
        self.engine
            .dispatcher
            .apply_result(&mut plan, step_id, &result)?;
        self.engine.plans.commit(&mut plan).await
    }
}

/// Waits for a spawned execution unless `cancel` fires first; the execution
/// keeps running either way.
async fn join_or_cancel(
    session_id: &str,
    step_id: StepId,
    task: JoinHandle<Result<TurnResponse>>,
    cancel: &CancellationToken,
) -> Result<TurnResponse> {
    tokio::select! {
        joined = task => joined?,
        () = cancel.cancelled() => {
            info!("turn for session '{session_id}' cancelled while '{step_id}' runs");
            Ok(TurnResponse::Cancelled { step_id })
        }
    }
}
