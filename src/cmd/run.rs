//! Night-shift runs: `nightshift run <task>` and `nightshift column <stage>`.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use nightshift::runner::{RunOutcome, RunStatus};
use nightshift::task::Stage;

use super::super::{Cli, exit};

/// What a run works through.
pub enum RunTarget {
    Task(String),
    Column(Stage),
}

impl RunTarget {
    fn describe(&self) -> String {
        match self {
            Self::Task(id) => format!("task {}", id),
            Self::Column(stage) => format!("column {}", stage),
        }
    }
}

pub fn check_run_prerequisites(project_dir: &Path) -> Result<()> {
    use nightshift::init::is_initialized;

    if !is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'nightshift init' first.");
    }
    Ok(())
}

/// Exit code for a resolved run.
pub fn exit_code(outcome: &RunOutcome) -> u8 {
    match outcome.status {
        RunStatus::Stopped => exit::STOPPED,
        RunStatus::Failed => exit::TASKS_FAILED,
        RunStatus::Completed if outcome.has_failures() => exit::TASKS_FAILED,
        RunStatus::Completed => exit::OK,
    }
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, target: RunTarget) -> Result<u8> {
    use nightshift::config::NightShiftConfig;
    use nightshift::runner::RunnerEngine;
    use nightshift::ui::RunProgress;
    use nightshift::ui::icons::REPORT;

    check_run_prerequisites(project_dir)?;
    let config = NightShiftConfig::with_cli_args(project_dir.to_path_buf(), cli.max_attempts)?;
    let engine = Arc::new(RunnerEngine::from_config(&config));

    let hidden = cli.log_json || !console::Term::stderr().is_term();
    let progress = Arc::new(RunProgress::new(cli.verbose, hidden));
    let watcher = Arc::clone(&progress).watch(engine.subscribe());
    progress.print_header(&target.describe());

    // Ctrl-C cancels the active attempt; the run still resolves and saves its report
    let stopper = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if engine.stop() {
                    tracing::warn!("interrupt received; stopping night shift");
                }
            }
        })
    };

    let result = match &target {
        RunTarget::Task(id) => engine.run_task(id).await,
        RunTarget::Column(stage) => engine.run_column(*stage).await,
    };
    stopper.abort();

    match result {
        Ok(outcome) => {
            let _ = watcher.await;
            progress.finish(&outcome);
            println!("{}{}", REPORT, outcome.report_path.display());
            Ok(exit_code(&outcome))
        }
        Err(e) => {
            watcher.abort();
            progress.abandon(&e.to_string());
            Err(e.into())
        }
    }
}
