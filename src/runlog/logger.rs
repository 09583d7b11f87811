use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::{FinishReason, RunnerTaskResult, TaskStatus, format_duration};
use crate::config::NIGHTSHIFT_DIR;

/// Machine-readable copy of the report, written next to the Markdown file.
pub const REPORT_JSON: &str = "report.json";

const REPORT_PREFIX: &str = "night-shift-";
const NO_TASKS: &str = "_No tasks were processed in this run._";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogState {
    Idle,
    Running,
    Sealed,
}

/// Accumulates task results for the active run.
///
/// `idle → running (start_run) → running (record_task)* → sealed (finish_run)`.
/// Rendering works in every state, so a live view can show an unfinished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerLog {
    state: LogState,
    started_at: DateTime<Local>,
    finished_at: Option<DateTime<Local>>,
    finish_reason: Option<FinishReason>,
    tasks: Vec<RunnerTaskResult>,
}

impl Default for RunnerLog {
    fn default() -> Self {
        Self::new()
    }
}

/// `<root>/.nightshift/logs`
pub fn logs_dir(root: &Path) -> PathBuf {
    root.join(NIGHTSHIFT_DIR).join("logs")
}

impl RunnerLog {
    pub fn new() -> Self {
        Self {
            state: LogState::Idle,
            started_at: Local::now(),
            finished_at: None,
            finish_reason: None,
            tasks: Vec::new(),
        }
    }

    pub fn start_run(&mut self) {
        self.start_run_at(Local::now());
    }

    /// Reset to a fresh run, whatever state the log was in.
    pub fn start_run_at(&mut self, started_at: DateTime<Local>) {
        self.state = LogState::Running;
        self.started_at = started_at;
        self.finished_at = None;
        self.finish_reason = None;
        self.tasks.clear();
    }

    pub fn record_task(&mut self, result: RunnerTaskResult) -> Result<()> {
        if self.state != LogState::Running {
            anyhow::bail!("record_task called with no active run ({:?})", self.state);
        }
        self.tasks.push(result);
        Ok(())
    }

    pub fn finish_run(&mut self, reason: FinishReason) -> Result<()> {
        self.finish_run_at(reason, Local::now())
    }

    pub fn finish_run_at(&mut self, reason: FinishReason, finished_at: DateTime<Local>) -> Result<()> {
        if self.state != LogState::Running {
            anyhow::bail!("finish_run called with no active run ({:?})", self.state);
        }
        self.state = LogState::Sealed;
        self.finished_at = Some(finished_at);
        self.finish_reason = Some(reason);
        Ok(())
    }

    pub fn state(&self) -> LogState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn tasks(&self) -> &[RunnerTaskResult] {
        &self.tasks
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Elapsed time of the run; up to now while it is still running.
    pub fn total_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Local::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Directory name for this run, unique to the second.
    pub fn run_dir_name(&self) -> String {
        self.started_at.format("%Y-%m-%d_%H-%M-%S").to_string()
    }

    /// `<root>/.nightshift/logs/<run>`
    pub fn run_dir(&self, root: &Path) -> PathBuf {
        logs_dir(root).join(self.run_dir_name())
    }

    pub fn report_file_name(&self) -> String {
        format!("{}{}.md", REPORT_PREFIX, self.run_dir_name())
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Night Shift Report — {}\n\n",
            self.started_at.format("%Y-%m-%d %H:%M")
        );

        out.push_str("## Summary\n\n");
        out.push_str("| Metric | Value |\n");
        out.push_str("|--------|-------|\n");
        out.push_str(&format!("| Tasks processed | {} |\n", self.tasks.len()));
        out.push_str(&format!("| Completed | {} |\n", self.count(TaskStatus::Completed)));
        out.push_str(&format!("| Failed | {} |\n", self.count(TaskStatus::Failed)));
        out.push_str(&format!("| Crashed | {} |\n", self.count(TaskStatus::Crashed)));
        out.push_str(&format!("| Total time | {} |\n", format_duration(self.total_ms())));
        out.push_str(&format!(
            "| Finish reason | {} |\n",
            self.finish_reason.map(|r| r.as_str()).unwrap_or("-")
        ));

        out.push_str("\n## Tasks\n\n");
        if self.tasks.is_empty() {
            out.push_str(NO_TASKS);
            out.push('\n');
        } else {
            for (i, task) in self.tasks.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                task.render(&mut out);
            }
        }
        out
    }

    /// Write the Markdown report (and `report.json`) into this run's log
    /// directory under `root`, returning the Markdown path.
    pub fn save(&self, root: &Path) -> Result<PathBuf> {
        let run_dir = self.run_dir(root);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create log directory: {}", run_dir.display()))?;

        let report_path = run_dir.join(self.report_file_name());
        fs::write(&report_path, self.to_markdown())
            .with_context(|| format!("Failed to write report: {}", report_path.display()))?;

        let json = serde_json::to_string_pretty(self).context("Failed to serialize run log")?;
        fs::write(run_dir.join(REPORT_JSON), json).context("Failed to write report.json")?;

        Ok(report_path)
    }
}

/// Saved Markdown reports under `logs_dir`, most recent first.
pub fn list_reports(logs_dir: &Path) -> Result<Vec<PathBuf>> {
    if !logs_dir.exists() {
        return Ok(Vec::new());
    }

    let mut reports = Vec::new();
    for entry in fs::read_dir(logs_dir)? {
        let run_dir = entry?.path();
        if !run_dir.is_dir() {
            continue;
        }
        for file in fs::read_dir(&run_dir)? {
            let path = file?.path();
            let is_report = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(REPORT_PREFIX) && n.ends_with(".md"));
            if is_report {
                reports.push(path);
            }
        }
    }

    reports.sort();
    reports.reverse(); // Most recent first
    Ok(reports)
}
