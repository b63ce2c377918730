//! Waypoint CLI
//!
//! Drives the plan engine from the command line: one invocation of `wp turn`
//! is one conversational turn, with plans and results kept in SQLite between
//! invocations.

mod args;
mod cli;
mod renderer;
mod tools;

use anyhow::Result;
use args::{Args, Commands};
use clap::Parser;
use cli::Cli;
use log::info;
use renderer::TerminalRenderer;
use Commands::*;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let Args {
        database_file,
        config,
        no_color,
        command,
    } = Args::parse();

    let cli = Cli::new(database_file, config, TerminalRenderer::new(!no_color));

    info!("Waypoint started");

    match command {
        Plan { command } => cli.handle_plan_command(command).await,
        Turn(args) => cli.turn(args).await,
        History(args) => cli.history(args).await,
        Run(args) => cli.run(args).await,
        Schema => cli.schema(),
    }
}
