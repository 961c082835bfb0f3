//! codemem CLI - process entry point for the MCP server and its
//! background task scheduler.

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match cli.command {
        Commands::Serve { config } => cli::commands::serve(config.as_deref())?,
        Commands::Config { action } => cli::commands::config(action)?,
        Commands::Task { action } => cli::commands::task(action)?,
    }

    Ok(())
}
