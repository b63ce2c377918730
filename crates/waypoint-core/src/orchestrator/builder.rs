//! Builder for creating and configuring Orchestrator instances.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Orchestrator;
use crate::{
    config::EngineConfig,
    controller::{
        ComplexityPolicy, ControllerDecisionEngine, FrontierSelector, LowestIndex,
        RegenerationPolicy,
    },
    dispatcher::PlanStepDispatcher,
    error::{EngineError, Result},
    executor::OperationExecutor,
    normalizer::{DependencyDefault, PlanNormalizer},
    planner::Planner,
    registry::ToolRegistry,
    store::{
        MemoryResultStore, MemorySessionStore, PlanStore, ResultStore, SessionStore,
        SqliteResultStore, SqliteSessionStore,
    },
};

enum Stores {
    Sqlite(Option<PathBuf>),
    Memory,
    Custom(Arc<dyn SessionStore>, Arc<dyn ResultStore>),
}

/// Builder for creating and configuring Orchestrator instances.
///
/// The planner and both decision policies have no defaults and must be set.
pub struct EngineBuilder {
    stores: Stores,
    config: Option<EngineConfig>,
    config_path: Option<PathBuf>,
    registry: ToolRegistry,
    planner: Option<Arc<dyn Planner>>,
    complexity: Option<Arc<dyn ComplexityPolicy>>,
    regeneration: Option<Arc<dyn RegenerationPolicy>>,
    selector: Arc<dyn FrontierSelector>,
}

impl EngineBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            stores: Stores::Sqlite(None),
            config: None,
            config_path: None,
            registry: ToolRegistry::default(),
            planner: None,
            complexity: None,
            regeneration: None,
            selector: Arc::new(LowestIndex),
        }
    }

    /// Sets a custom database file path.
    ///
    /// If not specified, uses XDG Base Directory specification:
    /// `$XDG_DATA_HOME/waypoint/waypoint.db` or
    /// `~/.local/share/waypoint/waypoint.db`
    pub fn with_database_path<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.stores = Stores::Sqlite(Some(path.as_ref().to_path_buf()));
        }
        self
    }

    /// Keeps plans, history and payloads in memory.
    pub fn in_memory(mut self) -> Self {
        self.stores = Stores::Memory;
        self
    }

    /// Uses caller-provided stores.
    pub fn with_stores(
        mut self,
        sessions: Arc<dyn SessionStore>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        self.stores = Stores::Custom(sessions, results);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Reads the configuration from a TOML file at build time. An explicit
    /// [`with_config`](Self::with_config) wins over the file.
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.config_path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_planner(mut self, planner: impl Planner + 'static) -> Self {
        self.planner = Some(Arc::new(planner));
        self
    }

    pub fn with_complexity_policy(mut self, policy: impl ComplexityPolicy + 'static) -> Self {
        self.complexity = Some(Arc::new(policy));
        self
    }

    pub fn with_regeneration_policy(mut self, policy: impl RegenerationPolicy + 'static) -> Self {
        self.regeneration = Some(Arc::new(policy));
        self
    }

    /// Replaces the default lowest-index selection.
    pub fn with_frontier_selector(mut self, selector: impl FrontierSelector + 'static) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    /// Builds the configured orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` if the planner or a policy is
    /// missing or the configuration does not fit the registry
    /// Returns `EngineError::FileSystem` if the database path is invalid
    /// Returns `EngineError::Database` if database initialization fails
    pub async fn build(self) -> Result<Orchestrator> {
        let planner = self
            .planner
            .ok_or_else(|| EngineError::configuration("no planner configured"))?;
        let complexity = self
            .complexity
            .ok_or_else(|| EngineError::configuration("no complexity policy configured"))?;
        let regeneration = self
            .regeneration
            .ok_or_else(|| EngineError::configuration("no regeneration policy configured"))?;

        let config = match (self.config, self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => EngineConfig::load(path)?,
            (None, None) => EngineConfig::default(),
        };

        let (sessions, results): (Arc<dyn SessionStore>, Arc<dyn ResultStore>) = match self.stores
        {
            Stores::Memory => (
                Arc::new(MemorySessionStore::new()),
                Arc::new(MemoryResultStore::new()),
            ),
            Stores::Custom(sessions, results) => (sessions, results),
            Stores::Sqlite(path) => {
                let db_path = match path {
                    Some(path) => path,
                    None => Self::default_database_path()?,
                };
                (
                    Arc::new(SqliteSessionStore::open(&db_path).await?),
                    Arc::new(SqliteResultStore::open(&db_path).await?),
                )
            }
        };

        let dependency_default = if config.planning.implicit_dependencies {
            DependencyDefault::PreviousStep
        } else {
            DependencyDefault::None
        };
        let normalizer = PlanNormalizer::for_registry(&self.registry, dependency_default);
        let executor = OperationExecutor::new(self.registry, Arc::clone(&results), &config)?;

        Ok(Orchestrator::new(ControllerDecisionEngine {
            plans: PlanStore::new(sessions),
            dispatcher: PlanStepDispatcher::new(results),
            executor,
            normalizer,
            planner,
            complexity,
            regeneration,
            selector: self.selector,
        }))
    }

    /// Returns the default database path following XDG Base Directory
    /// specification.
    pub fn default_database_path() -> Result<PathBuf> {
        xdg::BaseDirectories::with_prefix("waypoint")
            .place_data_file("waypoint.db")
            .map_err(|e| EngineError::XdgDirectory(e.to_string()))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
