//! Data models for plans, steps, operations and turns.
//!
//! Display implementations for these models live in
//! [`crate::display::models`], keeping data structures apart from
//! presentation.
//!
//! # Examples
//!
//! ```rust
//! use waypoint_core::models::{Plan, PlanStep, Reference, StepStatus};
//! use serde_json::json;
//!
//! let mut plan = Plan::empty("session-1");
//! plan.steps.push(PlanStep::new("s1", "fetch").with_param("url", json!("https://example.com")));
//! plan.steps.push(
//!     PlanStep::new("s2", "summarize")
//!         .with_param("text", Reference::new("s1", Some("body")))
//!         .depends_on("s1"),
//! );
//!
//! assert_eq!(plan.frontier(), vec![0]);
//! assert_eq!(plan.steps[1].status, StepStatus::Pending);
//! println!("{}", plan); // markdown with status icons
//! ```

pub mod operation;
pub mod plan;
pub mod status;
pub mod step;
pub mod summary;
pub mod turn;


pub use operation::{
    Admission, Mode, OperationItem, OperationOptions, OperationRequest, OperationResult, ResultRef,
};
pub use plan::Plan;
pub use status::{ItemStatus, StepStatus};
pub use step::{ParamValue, Params, PlanStep, Reference, StepId};
pub use summary::PlanSummary;
pub use turn::{DirectReason, StepOutcome, Turn, TurnResponse};
