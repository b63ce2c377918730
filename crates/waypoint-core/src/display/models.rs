//! Display implementations for domain models.
//!
//! Everything formats as markdown so the CLI can hand it to the terminal
//! renderer unchanged.

use std::fmt;

use super::datetime::{Elapsed, LocalDateTime};
use crate::models::{
    DirectReason, ItemStatus, OperationResult, ParamValue, Plan, PlanStep, PlanSummary, StepId,
    StepOutcome, StepStatus, Turn, TurnResponse,
};
use crate::normalizer::Normalized;

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Reference(reference) => write!(f, "{reference}"),
            ParamValue::Literal(value) => write!(f, "{value}"),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.goal {
            Some(goal) => writeln!(f, "# Plan: {goal}")?,
            None => writeln!(f, "# Plan")?,
        }
        writeln!(f)?;

        writeln!(f, "- Session: {}", self.session_id)?;
        writeln!(f, "- Version: {}", self.version)?;
        writeln!(f, "- Created: {}", LocalDateTime(&self.created_at))?;
        writeln!(f, "- Updated: {}", LocalDateTime(&self.updated_at))?;

        if self.steps.is_empty() {
            writeln!(f, "\nNo steps in this plan.")?;
            return Ok(());
        }

        writeln!(f, "\n## Steps")?;
        writeln!(f)?;
        for step in &self.steps {
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "### {} `{}` ({})",
            self.id,
            self.action,
            self.status.with_icon()
        )?;
        writeln!(f)?;

        if !self.dependencies.is_empty() {
            let deps: Vec<&str> = self.dependencies.iter().map(StepId::as_str).collect();
            writeln!(f, "- After: {}", deps.join(", "))?;
        }
        for (key, value) in &self.params {
            writeln!(f, "- `{key}` = `{value}`")?;
        }
        if let Some(result_ref) = &self.result_ref {
            writeln!(f, "- Result: {result_ref}")?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "- Error: {error}")?;
        }
        if let Some(since) = &self.rate_limited_since {
            writeln!(f, "- Rate limited for {}", Elapsed(since))?;
        }
        if self.abandoned {
            writeln!(f, "- Result arrived after its turn was cancelled")?;
        }
        writeln!(f)
    }
}

impl fmt::Display for Normalized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            writeln!(f, "No steps.")?;
        } else {
            writeln!(f, "## Steps")?;
            writeln!(f)?;
            for step in &self.steps {
                write!(f, "{step}")?;
            }
        }
        if !self.warnings.is_empty() {
            writeln!(f, "## Warnings")?;
            writeln!(f)?;
            for warning in &self.warnings {
                writeln!(f, "- {warning}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "## {} (version {}) {}/{} done",
            self.session_id, self.version, self.done_steps, self.total_steps
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "pending {}, processing {}, failed {}, skipped {}",
            self.pending_steps, self.processing_steps, self.failed_steps, self.skipped_steps
        )
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.item_id.as_deref().unwrap_or(&self.action);
        write!(f, "{label} `{}`: {}", self.action, self.status)?;
        if let Some(payload_ref) = &self.payload_ref {
            write!(f, " -> {payload_ref}")?;
        }
        if let Some(error) = &self.error {
            write!(f, " ({error})")?;
        }
        if self.coalesced {
            write!(f, " [coalesced]")?;
        }
        Ok(())
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### {} `{}` ({})", self.step_id, self.action, self.status.with_icon())?;
        writeln!(f)?;
        if let Some(payload) = &self.payload {
            writeln!(f, "```json")?;
            writeln!(
                f,
                "{}",
                serde_json::to_string_pretty(payload).map_err(|_| fmt::Error)?
            )?;
            writeln!(f, "```")?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "Error: {error}")?;
        }
        writeln!(f)
    }
}

impl fmt::Display for TurnResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnResponse::DirectAnswer { reason } => match reason {
                DirectReason::NotComplex => writeln!(f, "Answering directly; no plan needed."),
                DirectReason::EmptyPlan => {
                    writeln!(f, "Answering directly; the planner produced no steps.")
                }
                DirectReason::PlanGenerationFailed(error) => {
                    writeln!(f, "Answering directly; planning failed: {error}")
                }
            },
            TurnResponse::PlanCreated { plan, warnings } => {
                write!(f, "{plan}")?;
                if !warnings.is_empty() {
                    writeln!(f, "## Warnings")?;
                    writeln!(f)?;
                    for warning in warnings {
                        writeln!(f, "- {warning}")?;
                    }
                }
                Ok(())
            }
            TurnResponse::Execute {
                step_id, request, ..
            } => writeln!(
                f,
                "Dispatching **{step_id}** ({} item(s), {} mode).",
                request.items.len(),
                request.mode.as_str()
            ),
            TurnResponse::StepFinished { step_id, result } => {
                writeln!(f, "Step **{step_id}** finished: {result}")
            }
            TurnResponse::StepFailed { step_id, error } => {
                writeln!(f, "Step **{step_id}** failed: {error}")
            }
            TurnResponse::ChainFinished { results, .. } => {
                writeln!(f, "## Chain")?;
                writeln!(f)?;
                for result in results {
                    writeln!(f, "- {result}")?;
                }
                Ok(())
            }
            TurnResponse::AwaitingStep { step_id } => {
                writeln!(f, "Step **{step_id}** is still running.")
            }
            TurnResponse::RateLimited {
                step_id,
                retry_after_ms,
            } => writeln!(
                f,
                "Step **{step_id}** is rate limited; try again in {retry_after_ms}ms."
            ),
            TurnResponse::PlanBlocked { failed, stalled } => {
                writeln!(f, "## Plan blocked")?;
                writeln!(f)?;
                for id in failed {
                    writeln!(f, "- {id}: failed")?;
                }
                for id in stalled {
                    writeln!(f, "- {id}: waiting on a step that did not succeed")?;
                }
                Ok(())
            }
            TurnResponse::PlanComplete { results } => {
                writeln!(f, "# Plan complete")?;
                writeln!(f)?;
                for outcome in results {
                    write!(f, "{outcome}")?;
                }
                Ok(())
            }
            TurnResponse::Cancelled { step_id } => {
                writeln!(f, "Cancelled; **{step_id}** keeps running in the background.")
            }
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "- {} **{}** {}: {}",
            LocalDateTime(&self.created_at),
            self.kind,
            self.input,
            self.summary
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::{ErrorKind, OperationError};
    use crate::models::Reference;

    #[test]
    fn test_plan_display_lists_steps_with_icons() {
        let mut plan = Plan::empty("session-1");
        plan.goal = Some("fetch then summarize".to_string());
        let mut s1 = PlanStep::new("s1", "fetch").with_param("url", json!("a"));
        s1.status = StepStatus::Done;
        plan.steps.push(s1);
        plan.steps.push(
            PlanStep::new("s2", "summarize")
                .with_param("text", Reference::new("s1", Some("body")))
                .depends_on("s1"),
        );

        let output = plan.to_string();
        assert!(output.contains("# Plan: fetch then summarize"));
        assert!(output.contains("### s1 `fetch` (✓ Done)"));
        assert!(output.contains("- `text` = `@s1.body`"));
        assert!(output.contains("- After: s1"));
    }

    #[test]
    fn test_empty_plan_display() {
        assert!(Plan::empty("s").to_string().contains("No steps in this plan."));
    }

    #[test]
    fn test_normalized_display_lists_warnings() {
        let normalized = Normalized {
            steps: vec![PlanStep::new("s1", "fetch")],
            warnings: vec!["line 2: dropped 'hmm'".to_string()],
        };
        let output = normalized.to_string();
        assert!(output.contains("### s1 `fetch` (○ Pending)"));
        assert!(output.contains("## Warnings"));
        assert!(output.contains("- line 2: dropped 'hmm'"));
    }

    #[test]
    fn test_blocked_response_display() {
        let response = TurnResponse::PlanBlocked {
            failed: vec![StepId::from("s1")],
            stalled: vec![StepId::from("s2")],
        };
        let output = response.to_string();
        assert!(output.contains("- s1: failed"));
        assert!(output.contains("- s2: waiting"));
    }

    #[test]
    fn test_step_failed_display() {
        let response = TurnResponse::StepFailed {
            step_id: StepId::from("s3"),
            error: OperationError::new(ErrorKind::DependencyUnresolved, "'s2' is failed, not done"),
        };
        assert!(response
            .to_string()
            .contains("Step **s3** failed: dependency_unresolved"));
    }
}
