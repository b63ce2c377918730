use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::{PlanCommands, RunArgs, SessionArgs, TurnArgs};

/// Command-line driver for the Waypoint plan engine
///
/// Waypoint turns a multi-step request into a dependency-aware plan, keeps it
/// per session and advances it one step per turn. Plans and step results live
/// in a SQLite database; each `turn` invocation is one conversational turn.
#[derive(Parser)]
#[command(version, about, name = "wp")]
pub struct Args {
    /// Path to the SQLite database file. Defaults to
    /// $XDG_DATA_HOME/waypoint/waypoint.db
    #[arg(long, global = true)]
    pub database_file: Option<PathBuf>,

    /// Path to the engine configuration (TOML). Defaults to
    /// $XDG_CONFIG_HOME/waypoint/config.toml when it exists
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable colored output and use plain text
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect, check or discard session plans
    #[command(alias = "p")]
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Run one conversational turn for a session
    #[command(alias = "t")]
    Turn(TurnArgs),
    /// Show the turns recorded for a session
    #[command(alias = "h")]
    History(SessionArgs),
    /// Run an operation request (JSON) through the executor
    Run(RunArgs),
    /// Print the JSON schema of the structured plan format
    Schema,
}
