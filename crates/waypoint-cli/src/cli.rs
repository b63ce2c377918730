//! Command wrappers and the handlers behind them.
//!
//! Each wrapper carries the clap attributes for one command and converts into
//! the matching core parameter struct, so the core stays free of clap:
//!
//! ```text
//! User Input → CLI Args (clap) → Core Params → handlers → Display → renderer
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use log::{debug, info};
use tokio_util::sync::CancellationToken;
use waypoint_core::{
    handlers, normalizer::StructuredPlan, params::*, EngineBuilder, EngineConfig, FilePlanner,
    FixedPlanner, OperationRequest, OperationStatus, Orchestrator, Plan, Planner,
};

use crate::renderer::TerminalRenderer;
use crate::tools;

/// A session to operate on
#[derive(Args)]
pub struct SessionArgs {
    #[arg(help = "Session identifier")]
    pub session: String,
}

/// Discard the plan of a session
///
/// A plan whose step is still processing is kept, since the turn running it
/// will write its result back. `--force` discards it anyway, for a turn whose
/// process is gone.
#[derive(Args)]
pub struct DiscardArgs {
    #[arg(help = "Session identifier")]
    pub session: String,
    #[arg(short, long, help = "Discard even while a step is processing")]
    pub force: bool,
}

impl From<DiscardArgs> for DiscardPlan {
    fn from(val: DiscardArgs) -> Self {
        DiscardPlan {
            session_id: val.session,
            force: val.force,
        }
    }
}

impl From<SessionArgs> for Session {
    fn from(val: SessionArgs) -> Self {
        Session {
            session_id: val.session,
        }
    }
}

/// Normalize a plan file without storing it
///
/// The file holds planner output: either a JSON object with a `steps` array
/// or one step per line (`[id:] action key=value ... [after id,...]`). Lines
/// that do not parse are dropped with a warning; structural problems reject
/// the whole plan.
#[derive(Args)]
pub struct CheckPlanArgs {
    #[arg(help = "File containing planner output (JSON or the line format)")]
    pub file: PathBuf,
    #[arg(
        long,
        help = "Steps without 'after' have no dependencies instead of following the previous step"
    )]
    pub no_implicit_deps: bool,
}

impl CheckPlanArgs {
    pub fn into_params(self) -> Result<CheckPlan> {
        Ok(CheckPlan {
            source: read_file(&self.file)?,
            implicit_dependencies: !self.no_implicit_deps,
        })
    }
}

/// Run one conversational turn
///
/// Without a plan the input is either answered directly or, with
/// `--complex`, handed to the planner (the contents of `--plan-file`). With a
/// plan, the next runnable step is executed. `--regenerate` replaces the
/// current plan, unless a step is still processing.
#[derive(Args)]
pub struct TurnArgs {
    #[arg(help = "Session identifier")]
    pub session: String,
    #[arg(help = "The user's message for this turn")]
    pub input: String,
    #[arg(short, long, help = "File the planner answers with")]
    pub plan_file: Option<PathBuf>,
    #[arg(long, help = "Treat the input as needing a plan")]
    pub complex: bool,
    #[arg(long, help = "Ask for a new plan in place of the current one")]
    pub regenerate: bool,
    #[arg(long, help = "Run a linear chain of steps as one sequence")]
    pub chain: bool,
}

impl From<&TurnArgs> for RunTurn {
    fn from(val: &TurnArgs) -> Self {
        RunTurn {
            session_id: val.session.clone(),
            input: val.input.clone(),
            chain: val.chain,
        }
    }
}

/// Run an operation request through the executor
///
/// The file holds an `OperationRequest` as JSON, for example
/// `{"mode": "batch", "items": [{"action": "echo", "params": {"a": 1}}]}`.
#[derive(Args)]
pub struct RunArgs {
    #[arg(help = "File containing the request as JSON")]
    pub file: PathBuf,
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Normalize a plan file against the built-in tools
    #[command(alias = "c")]
    Check(CheckPlanArgs),
    /// Show the current plan of a session
    #[command(alias = "s")]
    Show(SessionArgs),
    /// Show progress counts for the current plan of a session
    #[command(alias = "st")]
    Status(SessionArgs),
    /// Discard the current plan of a session
    #[command(aliases = ["d", "rm"])]
    Discard(DiscardArgs),
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Runs commands against the engine and renders their output.
pub struct Cli {
    database_file: Option<PathBuf>,
    config: Option<PathBuf>,
    renderer: TerminalRenderer,
}

impl Cli {
    pub fn new(
        database_file: Option<PathBuf>,
        config: Option<PathBuf>,
        renderer: TerminalRenderer,
    ) -> Self {
        Self {
            database_file,
            config,
            renderer,
        }
    }

    async fn engine<P: Planner + 'static>(
        &self,
        planner: P,
        complex: bool,
        regenerate: bool,
    ) -> Result<Orchestrator> {
        let config = self.config.clone().or_else(EngineConfig::default_path);
        if let Some(path) = &config {
            debug!("using configuration {}", path.display());
        }
        EngineBuilder::new()
            .with_database_path(self.database_file.as_ref())
            .with_config_file(config)
            .with_registry(tools::registry()?)
            .with_planner(planner)
            .with_complexity_policy(move |_input: &str| complex)
            .with_regeneration_policy(move |_input: &str, _plan: &Plan| regenerate)
            .build()
            .await
            .context("Failed to initialize engine")
    }

    /// An engine for commands that never plan.
    async fn store(&self) -> Result<Orchestrator> {
        self.engine(FixedPlanner::new(""), false, false).await
    }

    pub async fn handle_plan_command(&self, command: PlanCommands) -> Result<()> {
        match command {
            PlanCommands::Check(args) => self.check_plan(args),
            PlanCommands::Show(args) => self.show_plan(&args.into()).await,
            PlanCommands::Status(args) => self.plan_status(&args.into()).await,
            PlanCommands::Discard(args) => self.discard_plan(&args.into()).await,
        }
    }

    fn check_plan(&self, args: CheckPlanArgs) -> Result<()> {
        let params = args.into_params()?;
        let normalized = handlers::handle_check_plan(&tools::registry()?, &params)
            .context("Plan rejected")?;
        self.renderer.render(normalized);
        Ok(())
    }

    async fn show_plan(&self, params: &Session) -> Result<()> {
        let engine = self.store().await?;
        match handlers::handle_show_plan(engine.plans(), params).await? {
            Some(plan) => self.renderer.render(plan),
            None => self.renderer.render(no_plan(params)),
        }
        Ok(())
    }

    async fn plan_status(&self, params: &Session) -> Result<()> {
        let engine = self.store().await?;
        match handlers::handle_plan_summary(engine.plans(), params).await? {
            Some(summary) => self.renderer.render(summary),
            None => self.renderer.render(no_plan(params)),
        }
        Ok(())
    }

    async fn discard_plan(&self, params: &DiscardPlan) -> Result<()> {
        let engine = self.store().await?;
        let status = handlers::handle_discard_plan(engine.plans(), params).await?;
        self.renderer.render(status);
        Ok(())
    }

    pub async fn turn(&self, args: TurnArgs) -> Result<()> {
        let engine = match &args.plan_file {
            Some(path) => {
                self.engine(FilePlanner::new(path), args.complex, args.regenerate)
                    .await?
            }
            None => {
                self.engine(FixedPlanner::new(""), args.complex, args.regenerate)
                    .await?
            }
        };
        let params = RunTurn::from(&args);
        let response = handlers::handle_turn(&engine, &params, cancel_on_ctrl_c())
            .await
            .with_context(|| format!("Turn failed for session '{}'", params.session_id))?;
        info!("turn for '{}' ended with {}", params.session_id, response.kind());
        self.renderer.render(response);
        Ok(())
    }

    pub async fn history(&self, args: SessionArgs) -> Result<()> {
        let engine = self.store().await?;
        let history = handlers::handle_history(engine.plans(), &args.into()).await?;
        self.renderer.render(history);
        Ok(())
    }

    pub async fn run(&self, args: RunArgs) -> Result<()> {
        let source = read_file(&args.file)?;
        let request: OperationRequest =
            serde_json::from_str(&source).context("Failed to parse operation request")?;
        let engine = self.store().await?;
        let results = handlers::handle_run(engine.executor(), request).await?;
        self.renderer.render(results);
        Ok(())
    }

    pub fn schema(&self) -> Result<()> {
        let schema = schemars::schema_for!(StructuredPlan);
        let json = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
        self.renderer.render_json(&json);
        Ok(())
    }
}

/// A token cancelled by the first Ctrl-C. A step still running when the
/// process exits stays processing until a later turn fails it as stale.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, cancelling turn");
            cancel.cancel();
        }
    });
    token
}

fn no_plan(params: &Session) -> OperationStatus {
    OperationStatus::warning(format!("Session '{}' has no plan", params.session_id))
}
