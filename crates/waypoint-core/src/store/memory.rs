//! In-process stores backed by `tokio` locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{ResultStore, SessionStore};
use crate::error::{EngineError, Result};
use crate::models::{Plan, ResultRef, Turn};

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    plans: RwLock<HashMap<String, Plan>>,
    history: RwLock<HashMap<String, Vec<Turn>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_plan(&self, session_id: &str) -> Result<Option<Plan>> {
        Ok(self.plans.read().await.get(session_id).cloned())
    }

    async fn save_plan(&self, plan: &mut Plan) -> Result<()> {
        let mut plans = self.plans.write().await;
        let found = plans.get(&plan.session_id).map_or(0, |stored| stored.version);
        if found != plan.version {
            return Err(EngineError::VersionConflict {
                session_id: plan.session_id.clone(),
                expected: plan.version,
                found,
            });
        }
        plan.version += 1;
        plans.insert(plan.session_id.clone(), plan.clone());
        Ok(())
    }

    async fn append_history(&self, turn: &Turn) -> Result<()> {
        self.history
            .write()
            .await
            .entry(turn.session_id.clone())
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        Ok(self
            .history
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct MemoryResultStore {
    next_id: AtomicU64,
    payloads: RwLock<HashMap<ResultRef, Value>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.payloads.read().await.len()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, payload: Value) -> Result<ResultRef> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let reference = ResultRef::new(format!("res-{id}"));
        self.payloads
            .write()
            .await
            .insert(reference.clone(), payload);
        Ok(reference)
    }

    async fn get(&self, reference: &ResultRef) -> Result<Value> {
        self.payloads
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| EngineError::ResultNotFound {
                reference: reference.to_string(),
            })
    }
}
