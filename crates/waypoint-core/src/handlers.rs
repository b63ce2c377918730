//! Core handler functions shared by the engine's front ends.
//!
//! Each handler takes a core parameter struct ([`crate::params`]) and returns
//! domain data ready for display. Interfaces convert their arguments, call a
//! handler and render the result.
//!
//! ```text
//! Interface → Handler → Orchestrator | PlanStore | Executor → Models
//! ```
//!
//! ```rust,no_run
//! # use waypoint_core::{handlers::handle_show_plan, params::Session, store::{PlanStore, SqliteSessionStore}};
//! # use std::sync::Arc;
//! # async {
//! let sessions = SqliteSessionStore::open("waypoint.db").await?;
//! let plans = PlanStore::new(Arc::new(sessions));
//! let params = Session { session_id: "session-1".to_string() };
//! if let Some(plan) = handle_show_plan(&plans, &params).await? {
//!     println!("{plan}");
//! }
//! # Result::<(), waypoint_core::EngineError>::Ok(())
//! # };
//! ```

use log::warn;
use tokio_util::sync::CancellationToken;

use crate::{
    display::{History, OperationResults, OperationStatus},
    error::{EngineError, Result},
    executor::OperationExecutor,
    models::{OperationRequest, Plan, PlanSummary, TurnResponse},
    normalizer::{DependencyDefault, NormalizeError, Normalized, PlanNormalizer, RawPlan},
    orchestrator::Orchestrator,
    params::{CheckPlan, DiscardPlan, RunTurn, Session},
    registry::ToolRegistry,
    store::PlanStore,
};

fn require_session(session_id: &str) -> Result<&str> {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return Err(EngineError::invalid_input("session_id").with_reason("must not be empty"));
    }
    Ok(session_id)
}

/// Handle one conversational turn; `cancel` ends the turn early while a step
/// executes.
pub async fn handle_turn(
    engine: &Orchestrator,
    params: &RunTurn,
    cancel: CancellationToken,
) -> Result<TurnResponse> {
    if params.chain {
        engine
            .run_chain_cancellable(&params.session_id, &params.input, cancel)
            .await
    } else {
        engine
            .run_turn_cancellable(&params.session_id, &params.input, cancel)
            .await
    }
}

/// Handle normalizing planner output against a registry.
///
/// Nothing is stored; the result shows what a planner answer would become.
pub fn handle_check_plan(
    registry: &ToolRegistry,
    params: &CheckPlan,
) -> std::result::Result<Normalized, NormalizeError> {
    let dependency_default = if params.implicit_dependencies {
        DependencyDefault::PreviousStep
    } else {
        DependencyDefault::None
    };
    PlanNormalizer::for_registry(registry, dependency_default)
        .normalize(RawPlan::from_planner_output(&params.source))
}

/// Handle showing the current plan of a session.
///
/// Returns `None` when the session has no usable plan.
pub async fn handle_show_plan(plans: &PlanStore, params: &Session) -> Result<Option<Plan>> {
    let plan = plans.current(require_session(&params.session_id)?).await?;
    Ok(plan.is_usable().then_some(plan))
}

/// Handle a progress summary of the current plan.
pub async fn handle_plan_summary(
    plans: &PlanStore,
    params: &Session,
) -> Result<Option<PlanSummary>> {
    Ok(handle_show_plan(plans, params)
        .await?
        .as_ref()
        .map(PlanSummary::from))
}

/// Handle discarding the current plan of a session.
///
/// A plan with a processing step is kept unless `force` is set, for a step
/// whose executing process is known to be gone.
pub async fn handle_discard_plan(
    plans: &PlanStore,
    params: &DiscardPlan,
) -> Result<OperationStatus> {
    let session_id = require_session(&params.session_id)?;
    let mut plan = plans.current(session_id).await?;
    if !plan.is_usable() {
        return Ok(OperationStatus::warning(format!(
            "Session '{session_id}' has no plan"
        )));
    }
    if let Some(step) = plan.processing_step() {
        if !params.force {
            return Ok(OperationStatus::failure(format!(
                "Step '{}' is still processing; not discarding",
                step.id
            )));
        }
        warn!("discarding plan of '{session_id}' while '{}' is processing", step.id);
    }
    plans.discard(&mut plan).await?;
    Ok(OperationStatus::success(format!(
        "Plan for session '{session_id}' discarded (version {})",
        plan.version
    )))
}

/// Handle listing the turns of a session.
pub async fn handle_history(plans: &PlanStore, params: &Session) -> Result<History> {
    Ok(History(plans.history(require_session(&params.session_id)?).await?))
}

/// Handle running a raw operation request.
pub async fn handle_run(
    executor: &OperationExecutor,
    request: OperationRequest,
) -> Result<OperationResults> {
    Ok(OperationResults(executor.execute(request).await?))
}
