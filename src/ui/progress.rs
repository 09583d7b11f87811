use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::runlog::{RunnerTaskResult, TaskStatus, format_duration, format_tokens};
use crate::runner::{RunOutcome, RunStatus, RunnerState};
use crate::ui::icons::{CHECK, CRASH, CROSS, MOON, STOP};

/// Terminal UI for a night-shift run, rendered via `indicatif`.
///
/// One spinner follows the engine's state events (active task and stage);
/// per-task lines and the summary are printed once the run resolves.
pub struct RunProgress {
    multi: MultiProgress,
    spinner: ProgressBar,
    verbose: bool,
}

impl RunProgress {
    /// `hidden` suppresses all drawing, e.g. for JSON logs or non-TTY output.
    pub fn new(verbose: bool, hidden: bool) -> Self {
        let multi = if hidden {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };

        let spinner_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");

        let spinner = multi.add(ProgressBar::new_spinner());
        spinner.set_style(spinner_style);
        spinner.set_prefix("Night shift");
        spinner.set_message("starting...");

        Self {
            multi,
            spinner,
            verbose,
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() {
            return;
        }
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Banner printed before the engine starts.
    pub fn print_header(&self, target: &str) {
        self.print_line(format!(
            "{}{} {}",
            MOON,
            style("Night shift:").bold(),
            style(target).yellow()
        ));
        self.spinner.enable_steady_tick(Duration::from_millis(100));
    }

    /// Reflect one engine state snapshot in the spinner.
    pub fn update(&self, state: &RunnerState) {
        match (&state.active_task_id, state.active_stage) {
            (Some(task), Some(stage)) => {
                self.spinner.set_message(format!(
                    "{} {}",
                    style(stage).cyan(),
                    style(task).yellow()
                ));
                if self.verbose {
                    self.print_line(format!(
                        "    {} {} {}",
                        style("→").dim(),
                        style(stage).dim(),
                        style(task).dim()
                    ));
                }
            }
            _ if state.is_running => self.spinner.set_message("collecting tasks..."),
            _ => self.spinner.set_message("idle"),
        }
    }

    /// Follow engine state events until the channel closes or the engine
    /// reports idle after a run.
    pub fn watch(self: Arc<Self>, mut events: broadcast::Receiver<RunnerState>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut seen_running = false;
            loop {
                match events.recv().await {
                    Ok(state) => {
                        self.update(&state);
                        if state.is_running {
                            seen_running = true;
                        } else if seen_running {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stop the spinner and print per-task results.
    pub fn finish(&self, outcome: &RunOutcome) {
        let (icon, label) = match outcome.status {
            RunStatus::Completed if !outcome.has_failures() => (CHECK, style("completed").green()),
            RunStatus::Completed | RunStatus::Failed => (CROSS, style("finished with failures").red()),
            RunStatus::Stopped => (STOP, style("stopped").yellow()),
        };
        self.spinner.finish_and_clear();

        if outcome.tasks.is_empty() {
            self.print_line(format!("  {}", style("No tasks were processed.").dim()));
        }
        for task in &outcome.tasks {
            self.print_line(task_line(task));
            if let Some(error) = &task.error {
                self.print_line(format!("      {}", style(error).red()));
            }
        }
        self.print_line(format!("\n{}Night shift {}", icon, label));
    }

    /// Stop the spinner after an engine error.
    pub fn abandon(&self, error: &str) {
        self.spinner.abandon_with_message(format!("{}{}", CROSS, style(error).red()));
    }
}

/// One summary line per task: icon, id, status, attempts, tokens, time.
pub fn task_line(task: &RunnerTaskResult) -> String {
    let (icon, status) = match task.status {
        TaskStatus::Completed => (CHECK, style(task.status.as_str()).green()),
        TaskStatus::Failed => (CROSS, style(task.status.as_str()).red()),
        TaskStatus::Crashed => (CRASH, style(task.status.as_str()).red().bold()),
    };
    let mut line = format!(
        "  {}{} {} {}",
        icon,
        style(&task.task_id).bold(),
        status,
        style(format!(
            "({} attempts, {}, {})",
            task.attempts,
            format_tokens(task.tokens_in, task.tokens_out),
            format_duration(task.duration_ms)
        ))
        .dim()
    );
    if let Some(commit) = &task.commit {
        line.push_str(&format!(" {}", style(commit).cyan()));
    }
    line
}
