//! Task listing and run report commands.

use anyhow::Result;
use std::path::Path;

use nightshift::task::Stage;

use super::super::Cli;

pub async fn cmd_list(cli: &Cli, project_dir: &Path, stage: Option<Stage>) -> Result<()> {
    use nightshift::config::NightShiftConfig;
    use nightshift::init::is_initialized;
    use nightshift::task::{MarkdownTaskStore, TaskStore};

    if !is_initialized(project_dir) {
        println!("No tasks found. Run 'nightshift init' first to create the workspace.");
        return Ok(());
    }

    let config = NightShiftConfig::with_cli_args(project_dir.to_path_buf(), cli.max_attempts)?;
    let store = MarkdownTaskStore::new(config.tasks_dir());
    let tasks = store.list_tasks(stage).await?;

    if tasks.is_empty() {
        match stage {
            Some(stage) => println!("No tasks at stage {}.", stage),
            None => println!("No tasks found in {}.", store.tasks_dir().display()),
        }
        return Ok(());
    }

    println!("{:<28} {:<10} {:<8} Title", "Task", "Stage", "Attempts");
    println!(
        "{:<28} {:<10} {:<8} -----",
        "----------------------------", "----------", "--------"
    );
    for task in &tasks {
        println!(
            "{:<28} {:<10} {:<8} {}",
            task.id,
            task.stage.as_str(),
            task.attempts,
            task.display_title()
        );
    }
    println!();
    println!("{} task(s)", tasks.len());
    Ok(())
}

pub fn cmd_logs(project_dir: &Path, limit: Option<usize>) -> Result<()> {
    use nightshift::runlog::{list_reports, logs_dir};

    let reports = list_reports(&logs_dir(project_dir))?;
    if reports.is_empty() {
        println!("No run reports yet.");
        return Ok(());
    }

    for path in reports.iter().take(limit.unwrap_or(usize::MAX)) {
        println!("{}", path.display());
    }
    Ok(())
}
