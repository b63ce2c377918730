//! Core library for the Waypoint plan orchestration engine.
//!
//! Waypoint turns a multi-step goal into a dependency-aware plan, keeps that
//! plan across conversational turns, advances it one step per turn, and runs
//! each step's operation through an execution runtime with caching, rate
//! limiting, in-flight deduplication and bounded retries.
//!
//! # Components
//!
//! ```text
//! turn ─▶ controller ─▶ (no plan)   planner ─▶ normalizer ─▶ PlanStore
//!                    └▶ (plan)      dispatcher ─▶ executor ─▶ tools
//!                                        ▲            │
//!                                        └── result ◀─┘
//! ```
//!
//! - [`normalizer`]: raw planner output (JSON steps or the line language) to
//!   canonical plan steps
//! - [`executor`]: single, batch, sequence and parallel requests
//! - [`dispatcher`]: plan steps to requests, results back onto the plan
//! - [`controller`]: the per-turn decision engine and its policies
//! - [`store`]: session and result stores, and the [`PlanStore`]
//! - [`orchestrator`]: the per-turn driver, built with [`EngineBuilder`]
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use waypoint_core::{EngineBuilder, FilePlanner, Plan};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = EngineBuilder::new()
//!     .with_database_path(Some("waypoint.db"))
//!     .with_planner(FilePlanner::new("plan.txt"))
//!     .with_complexity_policy(|input: &str| input.split_whitespace().count() > 4)
//!     .with_regeneration_policy(|input: &str, _plan: &Plan| input.starts_with("new plan"))
//!     .build()
//!     .await?;
//!
//! let response = engine.run_turn("session-1", "fetch the page and summarize it").await?;
//! println!("{response}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod display;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod params;
pub mod planner;
pub mod reference;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use config::EngineConfig;
pub use controller::{
    ComplexityPolicy, ControllerDecisionEngine, FrontierSelector, LowestIndex, RegenerationPolicy,
};
pub use dispatcher::PlanStepDispatcher;
pub use display::{History, LocalDateTime, OperationResults, OperationStatus};
pub use error::{EngineError, ErrorKind, OperationError, Result};
pub use executor::OperationExecutor;
pub use models::{
    ItemStatus, Mode, OperationItem, OperationRequest, OperationResult, ParamValue, Plan,
    PlanStep, PlanSummary, Reference, ResultRef, StepId, StepStatus, Turn, TurnResponse,
};
pub use normalizer::{DependencyDefault, NormalizeError, PlanNormalizer, RawPlan};
pub use orchestrator::{EngineBuilder, Orchestrator};
pub use planner::{FilePlanner, FixedPlanner, PlanGenerationError, Planner, PlanningContext};
pub use registry::{Tool, ToolError, ToolRegistry, ToolSpec};
pub use store::{PlanStore, ResultStore, SessionStore};
