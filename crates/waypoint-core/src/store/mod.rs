//! Session and result stores.
//!
//! [`SessionStore`] and [`ResultStore`] are the collaborator seams; the
//! engine never assumes a particular backend. Two reference backends ship
//! with the crate: in-memory maps ([`memory`]) and SQLite ([`sqlite`]).
//! [`PlanStore`] is the engine's view of a session's plan on top of a
//! session store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryResultStore, MemorySessionStore};
pub use sqlite::{Database, SqliteResultStore, SqliteSessionStore};

use crate::error::Result;
use crate::models::{Plan, PlanStep, ResultRef, Turn, TurnResponse};

/// Persists one plan per session, plus the session's turn history.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_plan(&self, session_id: &str) -> Result<Option<Plan>>;

    /// Saves `plan` if the stored version still equals `plan.version`, then
    /// increments `plan.version`.
    ///
    /// # Errors
    ///
    /// `EngineError::VersionConflict` when another writer saved first.
    async fn save_plan(&self, plan: &mut Plan) -> Result<()>;

    async fn append_history(&self, turn: &Turn) -> Result<()>;

    /// Turns of a session, oldest first.
    async fn history(&self, session_id: &str) -> Result<Vec<Turn>>;
}

/// Holds step payloads so plans stay small.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put(&self, payload: Value) -> Result<ResultRef>;

    /// # Errors
    ///
    /// `EngineError::ResultNotFound` for an unknown handle.
    async fn get(&self, reference: &ResultRef) -> Result<Value>;
}

/// The canonical plan of each session.
#[derive(Clone)]
pub struct PlanStore {
    sessions: Arc<dyn SessionStore>,
}

impl PlanStore {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    /// The stored plan, or an empty one if the session has none.
    pub async fn current(&self, session_id: &str) -> Result<Plan> {
        Ok(self
            .sessions
            .load_plan(session_id)
            .await?
            .unwrap_or_else(|| Plan::empty(session_id)))
    }

    /// Persists every change made to `plan` since it was loaded.
    pub async fn commit(&self, plan: &mut Plan) -> Result<()> {
        plan.touch();
        self.sessions.save_plan(plan).await
    }

    /// Replaces the whole step list and persists it.
    pub async fn replace(
        &self,
        plan: &mut Plan,
        goal: Option<String>,
        steps: Vec<PlanStep>,
    ) -> Result<()> {
        plan.replace_steps(goal, steps);
        self.sessions.save_plan(plan).await
    }

    /// Clears the plan; the version still moves forward.
    pub async fn discard(&self, plan: &mut Plan) -> Result<()> {
        plan.clear();
        self.sessions.save_plan(plan).await
    }

    pub async fn record_turn(
        &self,
        session_id: &str,
        input: &str,
        response: &TurnResponse,
    ) -> Result<()> {
        self.sessions
            .append_history(&Turn::new(session_id, input, response))
            .await
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        self.sessions.history(session_id).await
    }
}
