use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use nightshift::task::Stage;

mod cmd;

#[derive(Parser)]
#[command(name = "nightshift")]
#[command(version, about = "Unattended coding-agent runner for markdown task boards")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit diagnostics as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Retry ceiling on a task's attempts counter. Overrides config.toml.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .nightshift workspace
    Init {
        /// Rewrite config.toml with the built-in defaults
        #[arg(long)]
        force: bool,
    },
    /// List tasks
    List {
        /// Only tasks at this stage
        #[arg(short, long)]
        stage: Option<Stage>,
    },
    /// Run one task from its current stage until it completes or fails
    Run { task_id: String },
    /// Run every task currently at a stage
    Column { stage: Stage },
    /// List saved run reports, newest first
    Logs {
        /// Show at most this many reports
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

/// Process exit codes.
pub mod exit {
    pub const OK: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const TASKS_FAILED: u8 = 2;
    pub const STOPPED: u8 = 3;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit::ERROR)
        }
    }
}

async fn run(cli: &Cli) -> Result<u8> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = nightshift::runlog::logs_dir(&project_dir);
    let _log_guard = nightshift::logging::init(
        nightshift::logging::LogOptions {
            verbose: cli.verbose,
            json: cli.log_json,
        },
        Some(&log_dir),
    );

    match &cli.command {
        Commands::Init { force } => {
            cmd::cmd_init(&project_dir, *force)?;
            Ok(exit::OK)
        }
        Commands::List { stage } => {
            cmd::cmd_list(cli, &project_dir, *stage).await?;
            Ok(exit::OK)
        }
        Commands::Run { task_id } => {
            cmd::cmd_run(cli, &project_dir, cmd::RunTarget::Task(task_id.clone())).await
        }
        Commands::Column { stage } => {
            cmd::cmd_run(cli, &project_dir, cmd::RunTarget::Column(*stage)).await
        }
        Commands::Logs { limit } => {
            cmd::cmd_logs(&project_dir, *limit)?;
            Ok(exit::OK)
        }
    }
}
