//! Pluggable decision hooks.
//!
//! Closures implement every policy, so callers can write
//! `|input: &str| input.contains(" then ")` where a policy is expected.

use crate::models::Plan;

/// Decides whether an input warrants a plan.
pub trait ComplexityPolicy: Send + Sync {
    fn is_complex(&self, input: &str) -> bool;
}

impl<F> ComplexityPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_complex(&self, input: &str) -> bool {
        self(input)
    }
}

/// Decides whether an input asks for the current plan to be thrown away.
pub trait RegenerationPolicy: Send + Sync {
    fn should_regenerate(&self, input: &str, plan: &Plan) -> bool;
}

impl<F> RegenerationPolicy for F
where
    F: Fn(&str, &Plan) -> bool + Send + Sync,
{
    fn should_regenerate(&self, input: &str, plan: &Plan) -> bool {
        self(input, plan)
    }
}

/// Picks the next step among the eligible ones.
///
/// `frontier` holds step indices in plan order and is never empty. Returning
/// an index outside it is a configuration error.
pub trait FrontierSelector: Send + Sync {
    fn select(&self, plan: &Plan, frontier: &[usize]) -> Option<usize>;
}

impl<F> FrontierSelector for F
where
    F: Fn(&Plan, &[usize]) -> Option<usize> + Send + Sync,
{
    fn select(&self, plan: &Plan, frontier: &[usize]) -> Option<usize> {
        self(plan, frontier)
    }
}

/// The eligible step that comes first in plan order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestIndex;

impl FrontierSelector for LowestIndex {
    fn select(&self, _plan: &Plan, frontier: &[usize]) -> Option<usize> {
        frontier.iter().min().copied()
    }
}
