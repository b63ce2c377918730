//! Plan step dispatcher.
//!
//! Translates plan steps into operation requests and writes operation
//! results back onto the plan. It never persists anything itself; the caller
//! commits the mutated [`Plan`] through the
//! [`PlanStore`](crate::store::PlanStore).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use jiff::Timestamp;
use log::{debug, info};
use serde_json::{Map, Value};

use crate::error::{EngineError, ErrorKind, OperationError, Result};
use crate::models::{
    ItemStatus, OperationItem, OperationRequest, OperationResult, ParamValue, Params, Plan,
    PlanStep, StepId, StepOutcome, StepStatus,
};
use crate::reference;
use crate::store::ResultStore;

/// Outcome of resolving a step's references: the resolved value, or the
/// structured reason the step cannot be dispatched.
pub type Resolution<T> = std::result::Result<T, OperationError>;

#[derive(Clone)]
pub struct PlanStepDispatcher {
    results: Arc<dyn ResultStore>,
}

impl PlanStepDispatcher {
    pub fn new(results: Arc<dyn ResultStore>) -> Self {
        Self { results }
    }

    /// Resolves every reference in the step's params against the stored
    /// payloads of the referenced steps.
    ///
    /// A referenced step that is not `done`, has no stored payload, or whose
    /// payload lacks the path yields a `DependencyUnresolved` error.
    ///
    /// # Errors
    ///
    /// Propagates result store faults other than a missing payload.
    pub async fn resolve_params(
        &self,
        step: &PlanStep,
        plan: &Plan,
    ) -> Result<Resolution<Map<String, Value>>> {
        let outputs = match self.load_outputs(step, plan, &BTreeSet::new()).await? {
            Ok(outputs) => outputs,
            Err(error) => return Ok(Err(error)),
        };
        Ok(reference::substitute(&step.params, &outputs))
    }

    /// Like [`resolve_params`](Self::resolve_params), but references to the
    /// steps in `keep` stay references. Used for chained sequence items, whose
    /// earlier outputs are only known once the sequence runs.
    pub async fn resolve_params_except(
        &self,
        step: &PlanStep,
        plan: &Plan,
        keep: &BTreeSet<StepId>,
    ) -> Result<Resolution<Params>> {
        let outputs = match self.load_outputs(step, plan, keep).await? {
            Ok(outputs) => outputs,
            Err(error) => return Ok(Err(error)),
        };
        let mut params = Params::new();
        for (key, value) in &step.params {
            let resolved = match value {
                ParamValue::Reference(r) if keep.contains(&r.from) => value.clone(),
                ParamValue::Reference(r) => match reference::resolve(r, &outputs) {
                    Ok(value) => ParamValue::Literal(value),
                    Err(error) => return Ok(Err(error)),
                },
                ParamValue::Literal(_) => value.clone(),
            };
            params.insert(key.clone(), resolved);
        }
        Ok(Ok(params))
    }

    async fn load_outputs(
        &self,
        step: &PlanStep,
        plan: &Plan,
        keep: &BTreeSet<StepId>,
    ) -> Result<Resolution<HashMap<StepId, Value>>> {
        let mut outputs = HashMap::new();
        for reference in step.references() {
            if keep.contains(&reference.from) || outputs.contains_key(&reference.from) {
                continue;
            }
            let Some(source) = plan.step(&reference.from) else {
                return Ok(Err(OperationError::dependency_unresolved(format!(
                    "'{}' is not a step of this plan",
                    reference.from
                ))));
            };
            if source.status != StepStatus::Done {
                return Ok(Err(OperationError::dependency_unresolved(format!(
                    "'{}' is {}, not done",
                    source.id,
                    source.status.as_str()
                ))));
            }
            let Some(result_ref) = &source.result_ref else {
                return Ok(Err(OperationError::dependency_unresolved(format!(
                    "'{}' has no stored result",
                    source.id
                ))));
            };
            match self.results.get(result_ref).await {
                Ok(payload) => {
                    outputs.insert(source.id.clone(), payload);
                }
                Err(EngineError::ResultNotFound { reference }) => {
                    return Ok(Err(OperationError::dependency_unresolved(format!(
                        "result '{reference}' of '{}' is gone",
                        source.id
                    ))));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Ok(outputs))
    }

    /// A single-mode request for `step`; the step id travels as the item id.
    pub fn build_request(&self, step: &PlanStep, resolved: Map<String, Value>) -> OperationRequest {
        OperationRequest::single(self.build_item(step, literal_params(resolved)))
    }

    pub fn build_item(&self, step: &PlanStep, params: Params) -> OperationItem {
        OperationItem::new(step.action.clone())
            .with_id(step.id.as_str())
            .with_params(params)
    }

    /// Marks a never-dispatched step failed (pending→failed).
    pub fn fail_before_dispatch(
        &self,
        plan: &mut Plan,
        step_id: &StepId,
        error: OperationError,
    ) -> Result<()> {
        let step = plan.step_mut(step_id)?;
        step.transition(StepStatus::Failed)?;
        info!("step '{step_id}' failed before dispatch: {error}");
        step.error = Some(error);
        Ok(())
    }

    /// Writes the executor's result onto a processing step.
    pub fn apply_result(
        &self,
        plan: &mut Plan,
        step_id: &StepId,
        result: &OperationResult,
    ) -> Result<()> {
        let step = plan.step_mut(step_id)?;
        if result.is_success() {
            step.transition(StepStatus::Done)?;
            step.result_ref = result.payload_ref.clone();
            step.error = None;
            debug!("step '{step_id}' done ({})", result.status.as_str());
        } else {
            step.transition(StepStatus::Failed)?;
            step.error = Some(result.error.clone().unwrap_or_else(|| {
                OperationError::new(
                    ErrorKind::Permanent,
                    format!("'{}' ended as {}", result.action, result.status.as_str()),
                )
            }));
            info!("step '{step_id}' failed: {}", result.status.as_str());
        }
        step.rate_limited_since = None;
        Ok(())
    }

    /// Applies the results of a chained sequence, index-aligned with
    /// `step_ids`. Steps whose item was skipped go pending→skipped; the rest
    /// are applied as if each had been dispatched on its own.
    pub fn apply_sequence(
        &self,
        plan: &mut Plan,
        step_ids: &[StepId],
        results: &[OperationResult],
    ) -> Result<()> {
        if step_ids.len() != results.len() {
            return Err(EngineError::invalid_input("results").with_reason(format!(
                "{} results for {} chained steps",
                results.len(),
                step_ids.len()
            )));
        }
        for (step_id, result) in step_ids.iter().zip(results) {
            let step = plan.step_mut(step_id)?;
            if result.status == ItemStatus::Skipped {
                step.transition(StepStatus::Skipped)?;
                step.error = result.error.clone();
                continue;
            }
            if step.status == StepStatus::Pending {
                step.transition(StepStatus::Processing)?;
                step.processing_since = Some(Timestamp::now());
            }
            self.apply_result(plan, step_id, result)?;
        }
        Ok(())
    }

    /// Records a result that arrived after its turn was cancelled.
    pub fn abandon(
        &self,
        plan: &mut Plan,
        step_id: &StepId,
        result: &OperationResult,
    ) -> Result<()> {
        self.apply_result(plan, step_id, result)?;
        plan.step_mut(step_id)?.abandoned = true;
        Ok(())
    }

    /// Final state of every step with its payload, for a finished plan.
    pub async fn outcomes(&self, plan: &Plan) -> Result<Vec<StepOutcome>> {
        let mut outcomes = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let payload = match &step.result_ref {
                Some(result_ref) => match self.results.get(result_ref).await {
                    Ok(payload) => Some(payload),
                    Err(EngineError::ResultNotFound { .. }) => None,
                    Err(e) => return Err(e),
                },
                None => None,
            };
            outcomes.push(StepOutcome {
                step_id: step.id.clone(),
                action: step.action.clone(),
                status: step.status,
                payload,
                error: step.error.clone(),
            });
        }
        Ok(outcomes)
    }

    /// The maximal linear chain starting at `head`: each next step is the
    /// only pending step depending on the previous one, and depends on
    /// nothing else.
    pub fn linear_chain(&self, plan: &Plan, head: &StepId) -> Vec<StepId> {
        let mut chain = vec![head.clone()];
        let mut current = head.clone();
        loop {
            let dependents: Vec<&PlanStep> = plan
                .steps
                .iter()
                .filter(|step| step.dependencies.contains(&current))
                .collect();
            let [next] = dependents.as_slice() else {
                break;
            };
            if next.status != StepStatus::Pending || next.dependencies.len() != 1 {
                break;
            }
            chain.push(next.id.clone());
            current = next.id.clone();
        }
        chain
    }
}

fn literal_params(resolved: Map<String, Value>) -> Params {
    resolved
        .into_iter()
        .map(|(key, value)| (key, ParamValue::Literal(value)))
        .collect()
}
