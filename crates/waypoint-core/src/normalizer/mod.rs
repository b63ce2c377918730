//! Plan normalizer: turns raw planner output into canonical plan steps.
//!
//! Planners answer in one of two shapes, a structured step list or the small
//! line language in [`grammar`]. Both are lowered to the same draft form and
//! go through one routine, [`PlanNormalizer::normalize`], which assigns ids,
//! resolves dependencies and validates the whole plan.
//!
//! Anything that makes the plan unexecutable (an unknown action, a dangling
//! dependency, a cycle) rejects the **whole** plan; a line of noise in the
//! text form is only dropped with a warning.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod grammar;

use crate::error::{ErrorKind, OperationError};
use crate::models::{ParamValue, Params, PlanStep, StepId};
use crate::registry::ToolRegistry;

/// Whole-plan validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("step '{step}' uses unknown action '{action}'")]
    UnknownAction { step: String, action: String },

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("step '{step}' depends on undefined step '{dependency}'")]
    MissingDependency { step: String, dependency: String },

    #[error("step '{step}' references undefined step '{target}'")]
    UnknownReference { step: String, target: String },

    #[error("dependency cycle involving step '{0}'")]
    CycleDetected(String),
}

impl From<NormalizeError> for OperationError {
    fn from(error: NormalizeError) -> Self {
        OperationError::new(ErrorKind::PlanParse, error.to_string())
    }
}

/// One step of the structured planner format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct RawStep {
    /// Step id; generated from the position when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Registered action to run
    pub action: String,

    /// Parameters; `{"$ref": "<step id>", "path": "a.b"}` references another
    /// step's output
    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    /// Explicit dependencies; when absent the normalizer's default applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

/// The structured planner format as a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct StructuredPlan {
    pub steps: Vec<RawStep>,
}

/// Planner output before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPlan {
    Structured(Vec<RawStep>),
    Text(String),
}

impl RawPlan {
    /// A JSON step array or `{"steps": [...]}` is structured; anything else is
    /// read as the line language.
    pub fn from_planner_output(output: &str) -> Self {
        let trimmed = output.trim();
        if let Ok(steps) = serde_json::from_str::<Vec<RawStep>>(trimmed) {
            return RawPlan::Structured(steps);
        }
        if let Ok(plan) = serde_json::from_str::<StructuredPlan>(trimmed) {
            return RawPlan::Structured(plan.steps);
        }
        RawPlan::Text(output.to_string())
    }
}

/// What a step depends on when its input names no dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyDefault {
    /// The immediately preceding step (implicit linear chain)
    PreviousStep,
    /// Nothing; the step is eligible immediately
    None,
}

/// Normalized steps plus the warnings for dropped lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub steps: Vec<PlanStep>,
    pub warnings: Vec<String>,
}

/// Common lowered form of both input shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub(crate) id: Option<String>,
    pub(crate) action: String,
    pub(crate) params: Params,
    pub(crate) depends_on: Option<Vec<String>>,
}

impl From<RawStep> for Draft {
    fn from(step: RawStep) -> Self {
        Self {
            id: step.id,
            action: step.action,
            params: step
                .params
                .into_iter()
                .map(|(key, value)| (key, ParamValue::from_json(value)))
                .collect(),
            depends_on: step.depends_on,
        }
    }
}

pub struct PlanNormalizer {
    known_actions: HashSet<String>,
    dependency_default: DependencyDefault,
}

impl PlanNormalizer {
    /// The dependency default is always chosen by the caller.
    pub fn new<I, S>(known_actions: I, dependency_default: DependencyDefault) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_actions: known_actions.into_iter().map(Into::into).collect(),
            dependency_default,
        }
    }

    pub fn for_registry(registry: &ToolRegistry, dependency_default: DependencyDefault) -> Self {
        Self::new(registry.actions(), dependency_default)
    }

    pub fn dependency_default(&self) -> DependencyDefault {
        self.dependency_default
    }

    pub fn normalize(&self, raw: RawPlan) -> Result<Normalized, NormalizeError> {
        let (drafts, warnings) = match raw {
            RawPlan::Structured(steps) => (steps.into_iter().map(Draft::from).collect(), Vec::new()),
            RawPlan::Text(source) => grammar::parse(&source),
        };
        let steps = self.normalize_steps(drafts)?;
        Ok(Normalized { steps, warnings })
    }

    fn normalize_steps(&self, drafts: Vec<Draft>) -> Result<Vec<PlanStep>, NormalizeError> {
        let ids: Vec<StepId> = drafts
            .iter()
            .enumerate()
            .map(|(index, draft)| match &draft.id {
                Some(id) => StepId::new(id.clone()),
                None => StepId::new(format!("s{}", index + 1)),
            })
            .collect();

        let mut seen = HashSet::new();
        for id in &ids {
            if !seen.insert(id) {
                return Err(NormalizeError::DuplicateStepId(id.to_string()));
            }
        }

        let mut steps = Vec::with_capacity(drafts.len());
        for (index, draft) in drafts.into_iter().enumerate() {
            let id = ids[index].clone();

            if !self.known_actions.contains(&draft.action) {
                return Err(NormalizeError::UnknownAction {
                    step: id.to_string(),
                    action: draft.action,
                });
            }

            let mut dependencies: BTreeSet<StepId> = match &draft.depends_on {
                Some(explicit) => explicit.iter().cloned().map(StepId::new).collect(),
                None => match self.dependency_default {
                    DependencyDefault::PreviousStep if index > 0 => {
                        BTreeSet::from([ids[index - 1].clone()])
                    }
                    _ => BTreeSet::new(),
                },
            };
            if let Some(dependency) = dependencies.iter().find(|dep| !seen.contains(dep)) {
                return Err(NormalizeError::MissingDependency {
                    step: id.to_string(),
                    dependency: dependency.to_string(),
                });
            }

            let mut step = PlanStep::new(id.clone(), draft.action);
            step.params = draft.params;
            for reference in step.references() {
                if !seen.contains(&reference.from) {
                    return Err(NormalizeError::UnknownReference {
                        step: id.to_string(),
                        target: reference.from.to_string(),
                    });
                }
                if dependencies.insert(reference.from.clone()) {
                    debug!("step '{id}' references '{}'; added as dependency", reference.from);
                }
            }
            step.dependencies = dependencies;
            steps.push(step);
        }

        detect_cycle(&steps)?;
        Ok(steps)
    }
}

/// Kahn's algorithm; reports the first step (in plan order) left on a cycle.
fn detect_cycle(steps: &[PlanStep]) -> Result<(), NormalizeError> {
    let mut in_degree: HashMap<&StepId, usize> = steps
        .iter()
        .map(|step| (&step.id, step.dependencies.len()))
        .collect();
    let mut dependents: HashMap<&StepId, Vec<&StepId>> = HashMap::new();
    for step in steps {
        for dep in &step.dependencies {
            dependents.entry(dep).or_default().push(&step.id);
        }
    }

    let mut ready: Vec<&StepId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;
    while let Some(id) = ready.pop() {
        visited += 1;
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(*dependent);
                }
            }
        }
    }

    if visited == steps.len() {
        return Ok(());
    }
    let stuck = steps
        .iter()
        .find(|step| in_degree.get(&step.id).is_some_and(|degree| *degree > 0))
        .map(|step| step.id.to_string())
        .unwrap_or_default();
    Err(NormalizeError::CycleDetected(stuck))
}
