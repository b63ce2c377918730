#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::Instant;
use waypoint_core::{
    EngineBuilder, EngineConfig, FixedPlanner, Orchestrator, Plan, Tool, ToolError, ToolRegistry,
    ToolSpec,
};

/// A scriptable tool that echoes its params and counts invocations.
pub struct TestTool {
    spec: ToolSpec,
    calls: AtomicUsize,
    delay: Option<Duration>,
    transient_failures: usize,
    permanent: bool,
    gate: Option<Arc<Notify>>,
}

impl TestTool {
    pub fn new(name: &str) -> Self {
        Self {
            spec: ToolSpec::new(name),
            calls: AtomicUsize::new(0),
            delay: None,
            transient_failures: 0,
            permanent: false,
            gate: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails transiently on the first `count` calls.
    pub fn flaky(mut self, count: usize) -> Self {
        self.transient_failures = count;
        self
    }

    pub fn failing(mut self) -> Self {
        self.permanent = true;
        self
    }

    /// Blocks every call until the gate is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.spec = self.spec.non_idempotent();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Tool for TestTool {
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn execute(
        &self,
        params: Map<String, Value>,
        _deadline: Instant,
    ) -> Result<Value, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call < self.transient_failures {
            return Err(ToolError::transient(format!("{} hiccup #{call}", self.spec.name)));
        }
        if self.permanent {
            return Err(ToolError::permanent(format!("{} is broken", self.spec.name)));
        }
        Ok(Value::Object(params))
    }
}

pub fn registry(tools: &[Arc<TestTool>]) -> ToolRegistry {
    tools
        .iter()
        .fold(ToolRegistry::builder(), |builder, tool| {
            builder.register_arc(Arc::clone(tool) as Arc<dyn Tool>)
        })
        .build()
        .expect("Failed to build registry")
}

/// Retries without real backoff so transient failures resolve quickly.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

fn builder(planner_output: &str, tools: &[Arc<TestTool>], config: EngineConfig) -> EngineBuilder {
    EngineBuilder::new()
        .with_registry(registry(tools))
        .with_config(config)
        .with_planner(FixedPlanner::new(planner_output))
        .with_complexity_policy(|input: &str| input.contains(" then "))
        .with_regeneration_policy(|input: &str, _plan: &Plan| input.starts_with("instead"))
}

/// In-memory engine whose planner always answers `planner_output`.
/// Inputs containing " then " are complex; inputs starting with "instead"
/// ask for a new plan.
pub async fn create_test_engine(planner_output: &str, tools: &[Arc<TestTool>]) -> Orchestrator {
    create_test_engine_with(planner_output, tools, fast_config()).await
}

pub async fn create_test_engine_with(
    planner_output: &str,
    tools: &[Arc<TestTool>],
    config: EngineConfig,
) -> Orchestrator {
    builder(planner_output, tools, config)
        .in_memory()
        .build()
        .await
        .expect("Failed to create engine")
}

/// Same engine on a SQLite file in a temporary directory.
pub async fn create_sqlite_engine(
    planner_output: &str,
    tools: &[Arc<TestTool>],
) -> (TempDir, Orchestrator) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let engine = builder(planner_output, tools, fast_config())
        .with_database_path(Some(&db_path))
        .build()
        .await
        .expect("Failed to create engine");
    (temp_dir, engine)
}
