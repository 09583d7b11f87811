//! Process supervisor: one agent CLI invocation per task-stage attempt.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::AttemptError;
use crate::profile::{AgentProfile, PromptStyle};
use crate::signals::{AgentSignals, Verdict, extract_signals};
use crate::stream::OutputSummary;
use crate::task::Stage;
use crate::tracker::GitTracker;

/// Maximum bytes kept from each of stdout and stderr.
const MAX_OUTPUT_BYTES: usize = 50 * 1024 * 1024;

/// How long to wait for the output pipes to drain once the process is gone.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Characters of stderr quoted in a non-zero exit error.
const STDERR_TAIL_CHARS: usize = 400;

/// Everything needed to run one attempt.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    pub task_id: String,
    pub stage: Stage,
    /// 1-based attempt number, after increment
    pub attempt: u32,
    pub profile: AgentProfile,
    pub prompt: String,
    pub workdir: PathBuf,
    /// Where to save raw output, if transcripts are kept
    pub transcript_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptExit {
    /// Exited cleanly and the output parsed
    Completed,
    /// Ran, but the attempt did not succeed
    Failed,
    /// Could not be launched
    Crashed,
    /// Killed because the run was stopped
    Cancelled,
}

/// What one attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub exit: AttemptExit,
    pub files_changed: BTreeSet<String>,
    pub commit: Option<String>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub num_turns: Option<u32>,
    pub cost_usd: Option<f64>,
    pub audit_rating: Option<u8>,
    pub audit_verdict: Option<String>,
    pub verdict: Option<Verdict>,
    pub audit_report: Option<String>,
    pub output_file: Option<String>,
    pub duration: Duration,
    pub error: Option<AttemptError>,
}

impl AttemptReport {
    pub fn new(exit: AttemptExit, duration: Duration) -> Self {
        Self {
            exit,
            files_changed: BTreeSet::new(),
            commit: None,
            tokens_in: None,
            tokens_out: None,
            num_turns: None,
            cost_usd: None,
            audit_rating: None,
            audit_verdict: None,
            verdict: None,
            audit_report: None,
            output_file: None,
            duration,
            error: None,
        }
    }

    pub fn crashed(error: AttemptError, duration: Duration) -> Self {
        Self {
            error: Some(error),
            ..Self::new(AttemptExit::Crashed, duration)
        }
    }

    pub fn cancelled(duration: Duration) -> Self {
        Self::new(AttemptExit::Cancelled, duration)
    }

    fn fail(&mut self, error: AttemptError) {
        self.exit = AttemptExit::Failed;
        self.error = Some(error);
    }
}

/// Runs attempts. The engine only ever talks to this seam.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Run one attempt to completion, timeout or cancellation. Once
    /// `cancel` fires the child is killed before this returns.
    async fn run_attempt(&self, request: AttemptRequest, cancel: CancellationToken)
    -> AttemptReport;
}

/// Arguments for `profile` (without the executable), in invocation order:
/// subcommand, model, unattended flags, output flags, then the prompt for
/// `flag` and `positional` styles.
pub fn build_args(profile: &AgentProfile, prompt: &str) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(sub) = &profile.subcommand {
        args.push(sub.clone());
    }
    if let Some(model) = &profile.model {
        args.push(profile.model_flag.clone());
        args.push(model.clone());
    }
    args.extend(profile.unattended_flags.iter().cloned());
    args.extend(profile.output_flags.iter().cloned());
    match profile.prompt_style {
        PromptStyle::Flag => {
            args.push(profile.prompt_flag.clone());
            args.push(prompt.to_string());
        }
        PromptStyle::Positional => args.push(prompt.to_string()),
        PromptStyle::Stdin => {}
    }
    args
}

enum ProcessOutcome {
    Exited(std::process::ExitStatus),
    TimedOut(Duration),
    Cancelled,
}

/// Read from an async reader with a maximum byte limit.
async fn read_bounded<R: AsyncRead + Unpin>(mut reader: R, max_bytes: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            warn!(max_bytes, "output exceeded limit, truncating");
            while reader.read(&mut chunk).await? > 0 {}
            break;
        }
        buf.extend_from_slice(&chunk[..n.min(remaining)]);
    }
    Ok(buf)
}

async fn collect(task: Option<tokio::task::JoinHandle<std::io::Result<Vec<u8>>>>, name: &str) -> String {
    let Some(task) = task else {
        return String::new();
    };
    let bytes = match timeout(IO_CAPTURE_TIMEOUT, task).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(err))) => {
            warn!(stream = name, error = %err, "output capture failed");
            Vec::new()
        }
        Ok(Err(err)) => {
            warn!(stream = name, error = %err, "output reader panicked");
            Vec::new()
        }
        Err(_) => {
            warn!(stream = name, "output capture timed out");
            Vec::new()
        }
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    let kept: String = trimmed.chars().skip(count - max_chars).collect();
    format!("...{}", kept)
}

/// Supervisor that spawns the profile's CLI with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct CliSupervisor;

impl CliSupervisor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSupervisor for CliSupervisor {
    async fn run_attempt(
        &self,
        request: AttemptRequest,
        cancel: CancellationToken,
    ) -> AttemptReport {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return AttemptReport::cancelled(started.elapsed());
        }

        let profile = &request.profile;
        if let Err(e) = profile.validate() {
            return AttemptReport::crashed(e, started.elapsed());
        }

        let head_before = {
            let workdir = request.workdir.clone();
            off_runtime(move || GitTracker::open(&workdir).and_then(|t| t.head_sha()))
                .await
                .flatten()
        };

        let stdin = if profile.prompt_style == PromptStyle::Stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut cmd = Command::new(&profile.cli);
        cmd.args(build_args(profile, &request.prompt))
            .current_dir(&request.workdir)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(task_id = %request.task_id, cli = %profile.cli, error = %e, "failed to launch agent");
                return AttemptReport::crashed(
                    AttemptError::ProcessLaunch {
                        cli: profile.cli.clone(),
                        message: e.to_string(),
                    },
                    started.elapsed(),
                );
            }
        };
        info!(
            task_id = %request.task_id,
            stage = %request.stage,
            attempt = request.attempt,
            agent = %profile.name,
            pid = child.id().unwrap_or_default(),
            "agent process started"
        );

        if let Some(mut pipe) = child.stdin.take() {
            let prompt = request.prompt.clone();
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "agent closed stdin early");
                }
                // Dropping the pipe closes stdin
            });
        }
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_bounded(out, MAX_OUTPUT_BYTES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_bounded(err, MAX_OUTPUT_BYTES)));

        let limit = profile.safety.timeout();
        let deadline = limit.map(|d| started + d);
        let outcome = tokio::select! {
            result = child.wait() => match result {
                Ok(status) => ProcessOutcome::Exited(status),
                Err(e) => {
                    warn!(task_id = %request.task_id, error = %e, "failed to wait on agent process");
                    let _ = child.kill().await;
                    return AttemptReport::crashed(
                        AttemptError::ProcessLaunch { cli: profile.cli.clone(), message: e.to_string() },
                        started.elapsed(),
                    );
                }
            },
            () = cancel.cancelled() => {
                info!(task_id = %request.task_id, "cancellation requested; killing agent process");
                if let Err(e) = child.kill().await {
                    warn!(task_id = %request.task_id, error = %e, "failed to kill cancelled process");
                }
                ProcessOutcome::Cancelled
            }
            () = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                warn!(task_id = %request.task_id, "agent timed out; killing process");
                if let Err(e) = child.kill().await {
                    warn!(task_id = %request.task_id, error = %e, "failed to kill timed-out process");
                }
                ProcessOutcome::TimedOut(limit.unwrap_or_default())
            }
        };

        let stdout = collect(stdout_task, "stdout").await;
        let stderr = collect(stderr_task, "stderr").await;
        let duration = started.elapsed();

        let mut report = AttemptReport::new(AttemptExit::Completed, duration);
        if let Some(path) = &request.transcript_path {
            match write_transcript(path, &stdout, &stderr) {
                Ok(()) => report.output_file = Some(path.display().to_string()),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to write transcript"),
            }
        }

        let status = match outcome {
            ProcessOutcome::Cancelled => {
                report.exit = AttemptExit::Cancelled;
                return report;
            }
            ProcessOutcome::TimedOut(limit) => {
                report.fail(AttemptError::ProcessTimeout(limit));
                return report;
            }
            ProcessOutcome::Exited(status) => status,
        };

        let summary = if profile.structured_output() {
            Some(OutputSummary::parse(&stdout))
        } else {
            None
        };
        let signals = match &summary {
            Some(s) if s.events > 0 => extract_signals(&s.signal_text()),
            _ => extract_signals(&stdout),
        };
        let with_files = summary.is_none() && signals.files_changed.is_empty();
        let workspace = {
            let workdir = request.workdir.clone();
            off_runtime(move || workspace_changes(&workdir, head_before.as_deref(), with_files))
                .await
                .unwrap_or_default()
        };
        fill_results(&mut report, summary.as_ref(), &signals, &workspace);

        classify(&mut report, &request, status, summary.as_ref(), &signals, &stderr);
        debug!(
            task_id = %request.task_id,
            exit = ?report.exit,
            files = report.files_changed.len(),
            "attempt finished"
        );
        report
    }
}

fn write_transcript(path: &Path, stdout: &str, stderr: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        format!("=== stdout ===\n{}\n=== stderr ===\n{}\n", stdout, stderr),
    )
}

/// What git saw happen in the workspace during an attempt.
#[derive(Debug, Default)]
struct WorkspaceChanges {
    commit: Option<String>,
    files: BTreeSet<String>,
}

/// Run blocking git work off the async runtime. `None` if the task panicked.
async fn off_runtime<F, R>(f: F) -> Option<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "git inspection task failed");
            None
        }
    }
}

fn workspace_changes(
    workdir: &Path,
    head_before: Option<&str>,
    with_files: bool,
) -> WorkspaceChanges {
    let Some(tracker) = GitTracker::open(workdir) else {
        return WorkspaceChanges::default();
    };
    let mut files = BTreeSet::new();
    if with_files {
        match tracker.changed_paths_since(head_before) {
            Ok(paths) => files = paths,
            Err(e) => debug!(error = %e, "could not diff workspace"),
        }
    }
    WorkspaceChanges {
        commit: tracker.new_commit_since(head_before),
        files,
    }
}

fn fill_results(
    report: &mut AttemptReport,
    summary: Option<&OutputSummary>,
    signals: &AgentSignals,
    workspace: &WorkspaceChanges,
) {
    if let Some(summary) = summary {
        report.files_changed.extend(summary.files_changed.iter().cloned());
        report.tokens_in = summary.tokens_in;
        report.tokens_out = summary.tokens_out;
        report.num_turns = summary.num_turns;
        report.cost_usd = summary.cost_usd;
    }
    report.files_changed.extend(signals.files_changed.iter().cloned());

    report.commit = signals
        .commit
        .clone()
        .or_else(|| workspace.commit.clone());

    // Plain-text tools report nothing about files; ask git.
    if summary.is_none() && report.files_changed.is_empty() {
        report.files_changed.extend(workspace.files.iter().cloned());
    }

    report.audit_rating = signals.rating;
    report.audit_verdict = signals.verdict.clone();
    report.verdict = signals.classified_verdict();
    report.audit_report = signals.audit_report.clone();
}

fn classify(
    report: &mut AttemptReport,
    request: &AttemptRequest,
    status: std::process::ExitStatus,
    summary: Option<&OutputSummary>,
    signals: &AgentSignals,
    stderr: &str,
) {
    let safety = &request.profile.safety;
    if let (Some(allowed), Some(used)) = (safety.max_turns, report.num_turns)
        && used > allowed
    {
        report.fail(AttemptError::LimitExceeded {
            limit: "turn",
            used: used.to_string(),
            allowed: allowed.to_string(),
        });
        return;
    }
    if let (Some(allowed), Some(used)) = (safety.max_budget_usd, report.cost_usd)
        && used > allowed
    {
        report.fail(AttemptError::LimitExceeded {
            limit: "budget",
            used: format!("${:.2}", used),
            allowed: format!("${:.2}", allowed),
        });
        return;
    }

    if !status.success() {
        report.fail(AttemptError::NonZeroExit {
            exit_code: status.code().unwrap_or(-1),
            stderr_tail: tail(stderr, STDERR_TAIL_CHARS),
        });
        return;
    }

    if let Some(summary) = summary {
        if summary.events == 0 {
            report.fail(AttemptError::UnparsableOutput(
                "no structured events in agent output".to_string(),
            ));
            return;
        }
        if summary.is_error {
            let message = summary
                .result_text
                .clone()
                .unwrap_or_else(|| "agent flagged its result as an error".to_string());
            report.fail(AttemptError::AgentReported(message));
            return;
        }
    }

    if request.stage == Stage::Audit && report.verdict.is_none() {
        let message = match &signals.verdict {
            Some(raw) => format!("unrecognized audit verdict '{}'", raw),
            None => "audit produced no <verdict> tag".to_string(),
        };
        report.fail(AttemptError::UnparsableOutput(message));
        return;
    }

    report.exit = AttemptExit::Completed;
}
