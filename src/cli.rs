//! Command-line entry points (spec §6): `serve` starts the MCP server and
//! its background scheduler, `config`/`task` give direct, scriptable access
//! to the same C4-C8 operations the MCP tools expose, without going through
//! a client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use codemem_core::config::{Config, TaskRunnerConfig};
use codemem_core::scheduler::{HttpRunner, ProcessRunner, Runner, Scheduler};
use codemem_core::storage;
use codemem_core::tools::Core;

#[derive(Parser, Debug)]
#[command(name = "codemem", about = "Persistent memory store and task scheduler for coding assistants")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the MCP server (stdio transport) and, if enabled, the task scheduler.
    Serve {
        /// Path to a TOML config file; defaults to the platform config dir.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Inspect or initialize the on-disk configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage background tasks directly, bypassing MCP.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Write the default configuration to disk, if it doesn't already exist.
    Init,
}

#[derive(Subcommand, Debug)]
pub enum TaskAction {
    /// Enqueue a new task.
    Add {
        description: String,
        #[arg(long)]
        task_type: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        repo_url: Option<String>,
        #[arg(long, default_value_t = 5)]
        priority: i32,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List tasks, optionally filtered by status.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show recorded results for completed/failed tasks.
    Results {
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Cancel a pending task.
    Cancel { id: String },
}

/// Build the `Runner` the scheduler dispatches claimed tasks to, per the
/// config's `[task_runner]` table (spec §9 "Dynamic dispatch over runners").
fn build_runner(config: &Config) -> Arc<dyn Runner> {
    match &config.task_runner {
        TaskRunnerConfig::Http { endpoint, api_key } => Arc::new(HttpRunner::new(endpoint.clone(), api_key.clone())),
        TaskRunnerConfig::Process { program, args } => Arc::new(ProcessRunner::new(program.clone(), args.clone())),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p),
        None => Config::load_default(),
    }
}

/// Build a `Core` wired to a fresh `Scheduler`, without starting its cron loop.
/// Used by the `task` and one-shot `config` subcommands, which only need
/// direct repository access and not the background trigger loop.
fn build_core(config: Config) -> Result<Core> {
    let handle = storage::global_handle(&config.data_dir, config.vec_extension_path.as_deref())
        .context("failed to open global database")?;
    let runner = build_runner(&config);
    let scheduler = Arc::new(Scheduler::new(handle, runner, config.scheduler_cron.clone()));
    Ok(Core::new(config, scheduler))
}

pub mod commands {
    use super::*;

    pub fn serve(config_path: Option<&Path>) -> Result<()> {
        let config = load_config(config_path)?;
        let scheduler_enabled = config.scheduler_enabled;
        let core = build_core(config)?;
        let core = Arc::new(core);

        if scheduler_enabled {
            core.scheduler.start();
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build the async runtime")?;

        let result = runtime.block_on(codemem_core::mcp::run_server(core.clone()));

        if scheduler_enabled {
            core.scheduler.stop();
        }

        result
    }

    pub fn config(action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                let config = Config::load_default()?;
                println!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Init => {
                let path = codemem_core::config::default_config_path();
                if path.exists() {
                    println!("config already exists at {}", path.display());
                } else {
                    let path = Config::default().save_default()?;
                    println!("wrote default config to {}", path.display());
                }
            }
        }
        Ok(())
    }

    pub fn task(action: TaskAction) -> Result<()> {
        let config = Config::load_default()?;
        let core = build_core(config)?;

        match action {
            TaskAction::Add {
                description,
                task_type,
                project,
                repo_url,
                priority,
                timeout_ms,
            } => {
                let input = codemem_core::tools::TaskAddInput {
                    description,
                    task_type,
                    project,
                    repo_url,
                    priority,
                    scheduled_for: None,
                    context: None,
                    timeout_ms,
                };
                let out = codemem_core::tools::task_add(&core, input)?;
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            TaskAction::List { status, project, limit } => {
                let input = codemem_core::tools::TaskListInput {
                    status,
                    project,
                    since: None,
                    limit,
                };
                let out = codemem_core::tools::task_list(&core, input)?;
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            TaskAction::Results { task_id, limit } => {
                let input = codemem_core::tools::TaskResultsInput {
                    task_id,
                    since: None,
                    limit,
                };
                let out = codemem_core::tools::task_results(&core, input)?;
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            TaskAction::Cancel { id } => {
                let cancelled = codemem_core::tools::task_cancel(&core, &id)?;
                println!("{}", serde_json::json!({ "cancelled": cancelled }));
            }
        }
        Ok(())
    }
}
