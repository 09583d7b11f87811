//! The runner engine: one night-shift run at a time, tasks one at a time.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::guard::{RunClaim, RunGuard};
use super::supervisor::{
    AttemptExit, AttemptReport, AttemptRequest, CliSupervisor, ProcessSupervisor,
};
use super::transition::{AttemptOutcome, RetryBudget, Transition, next_transition};
use crate::config::NightShiftConfig;
use crate::errors::{AttemptError, RunnerError};
use crate::profile::ProfileResolver;
use crate::prompt::{ContextPromptAssembler, PromptAssembler};
use crate::runlog::{FinishReason, RunnerLog, RunnerTaskResult, StageRecord, TaskStatus};
use crate::signals::Verdict;
use crate::task::{MarkdownTaskStore, Stage, Task, TaskStore};

const EVENT_CAPACITY: usize = 64;

/// Snapshot published on every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerState {
    pub is_running: bool,
    pub active_task_id: Option<String>,
    pub active_stage: Option<Stage>,
}

/// Terminal status of a `run_task`/`run_column` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub report_path: PathBuf,
    pub tasks: Vec<RunnerTaskResult>,
}

impl RunOutcome {
    pub fn has_failures(&self) -> bool {
        self.tasks.iter().any(|t| t.status != TaskStatus::Completed)
    }
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Ceiling on a task's attempts counter
    pub max_attempts: u32,
    /// Audit → code loops allowed per task per run
    pub max_reworks: u32,
    /// Profile used when a task names neither agent nor provider
    pub default_agent: String,
    /// Project root; reports go to `<root>/.nightshift/logs`
    pub root: PathBuf,
    /// Working directory of agent processes
    pub workdir: PathBuf,
    pub save_transcripts: bool,
}

/// The engine's external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn TaskStore>,
    pub assembler: Arc<dyn PromptAssembler>,
    pub resolver: Arc<dyn ProfileResolver>,
    pub supervisor: Arc<dyn ProcessSupervisor>,
}

/// Singleton orchestrator for night-shift runs.
pub struct RunnerEngine {
    parts: Collaborators,
    settings: RunnerSettings,
    guard: Arc<RunGuard>,
    cancel: Mutex<Option<CancellationToken>>,
    log: Mutex<RunnerLog>,
    state: Mutex<RunnerState>,
    events: broadcast::Sender<RunnerState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// How processing of one task ended.
enum TaskEnd {
    /// Stage was not executable; nothing was recorded
    Skipped,
    Recorded(TaskStatus),
}

impl RunnerEngine {
    /// Engine sharing the process-wide run guard.
    pub fn new(parts: Collaborators, settings: RunnerSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            parts,
            settings,
            guard: RunGuard::process(),
            cancel: Mutex::new(None),
            log: Mutex::new(RunnerLog::new()),
            state: Mutex::new(RunnerState::default()),
            events,
        }
    }

    /// Engine wired to the project's markdown tasks, context files, agent
    /// profiles and real CLI processes.
    pub fn from_config(config: &NightShiftConfig) -> Self {
        let runner = config.runner();
        let parts = Collaborators {
            store: Arc::new(MarkdownTaskStore::in_workspace(&config.nightshift_dir)),
            assembler: Arc::new(ContextPromptAssembler::new(&config.nightshift_dir)),
            resolver: Arc::new(config.profile_resolver()),
            supervisor: Arc::new(CliSupervisor::new()),
        };
        let settings = RunnerSettings {
            max_attempts: runner.max_attempts,
            max_reworks: runner.max_reworks,
            default_agent: runner.default_agent.clone(),
            root: config.project_dir.clone(),
            workdir: config.project_dir.clone(),
            save_transcripts: runner.save_transcripts,
        };
        Self::new(parts, settings)
    }

    /// Replace the run guard, e.g. to isolate engines in tests.
    pub fn with_guard(mut self, guard: Arc<RunGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunnerState> {
        self.events.subscribe()
    }

    pub fn state(&self) -> RunnerState {
        lock(&self.state).clone()
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_active()
    }

    /// Markdown of the current (possibly unfinished) run.
    pub fn report_markdown(&self) -> String {
        lock(&self.log).to_markdown()
    }

    /// Request cancellation of the active run.
    ///
    /// Returns `false` when no run is active. Repeated calls are harmless.
    pub fn stop(&self) -> bool {
        match lock(&self.cancel).as_ref() {
            Some(token) => {
                if !token.is_cancelled() {
                    info!("stop requested; cancelling active run");
                }
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one task from its current stage until it completes, fails or the
    /// run is stopped.
    pub async fn run_task(&self, task_id: &str) -> Result<RunOutcome, RunnerError> {
        let (claim, cancel) = self.begin_run()?;
        info!(task_id, "night shift run started");

        let result = async {
            let task = self.parts.store.load_task(task_id).await?;
            self.process_task(task, &cancel).await
        }
        .await;

        let stopped = cancel.is_cancelled();
        let status = match &result {
            _ if stopped => RunStatus::Stopped,
            Ok(TaskEnd::Recorded(TaskStatus::Completed)) | Ok(TaskEnd::Skipped) => {
                RunStatus::Completed
            }
            Ok(TaskEnd::Recorded(TaskStatus::Failed | TaskStatus::Crashed)) | Err(_) => {
                RunStatus::Failed
            }
        };
        self.end_run(claim, result.map(|_| ()), status).await
    }

    /// Run every task currently in `stage`, in store order, one at a time.
    /// Tasks added after the call starts are not picked up.
    pub async fn run_column(&self, stage: Stage) -> Result<RunOutcome, RunnerError> {
        let (claim, cancel) = self.begin_run()?;
        info!(%stage, "night shift column run started");

        let result = async {
            let snapshot = self.parts.store.list_tasks(Some(stage)).await?;
            info!(%stage, tasks = snapshot.len(), "column snapshot taken");
            for task in snapshot {
                if cancel.is_cancelled() {
                    break;
                }
                self.process_task(task, &cancel).await?;
            }
            Ok::<(), RunnerError>(())
        }
        .await;

        let status = if cancel.is_cancelled() {
            RunStatus::Stopped
        } else if result.is_err() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.end_run(claim, result, status).await
    }

    /// Claim the guard and install the run's cancellation token in one
    /// critical section, so `stop()` never sees an active run without a token.
    fn begin_run(&self) -> Result<(RunClaim, CancellationToken), RunnerError> {
        let (claim, token) = {
            let mut cancel = lock(&self.cancel);
            let claim = self.guard.try_claim().ok_or(RunnerError::AlreadyActive)?;
            let token = CancellationToken::new();
            *cancel = Some(token.clone());
            (claim, token)
        };
        lock(&self.log).start_run();
        self.publish(RunnerState {
            is_running: true,
            active_task_id: None,
            active_stage: None,
        });
        Ok((claim, token))
    }

    async fn end_run(
        &self,
        claim: RunClaim,
        result: Result<(), RunnerError>,
        status: RunStatus,
    ) -> Result<RunOutcome, RunnerError> {
        let reason = match (&result, status) {
            (_, RunStatus::Stopped) => FinishReason::Stopped,
            (Err(_), _) => FinishReason::Failed,
            (Ok(()), RunStatus::Completed | RunStatus::Failed) => FinishReason::Completed,
        };

        let log = {
            let mut log = lock(&self.log);
            if let Err(e) = log.finish_run(reason) {
                warn!(error = %e, "run log was not running at finish");
            }
            log.clone()
        };
        let root = self.settings.root.clone();
        let saved = tokio::task::spawn_blocking(move || {
            let path = log.save(&root);
            (log, path)
        })
        .await;

        {
            let mut cancel = lock(&self.cancel);
            cancel.take();
            drop(claim);
        }
        self.publish(RunnerState::default());

        let (log, report_path) = match saved {
            Ok((log, Ok(path))) => (log, path),
            Ok((_, Err(e))) => return Err(RunnerError::Report(e)),
            Err(e) => return Err(RunnerError::Report(e.into())),
        };
        info!(
            %reason,
            tasks = log.tasks().len(),
            report = %report_path.display(),
            "night shift run finished"
        );

        result?;
        Ok(RunOutcome {
            status,
            report_path,
            tasks: log.tasks().to_vec(),
        })
    }

    fn publish(&self, state: RunnerState) {
        *lock(&self.state) = state.clone();
        // No subscribers is fine
        let _ = self.events.send(state);
    }

    /// Persist a task's pipeline state. Failures end that task, not the run.
    async fn persist(&self, id: &str, stage: Stage, attempts: u32) -> Result<(), String> {
        self.parts
            .store
            .save_task_stage(id, stage, attempts)
            .await
            .map_err(|e| {
                warn!(task_id = id, %stage, attempts, error = %e, "failed to save task state");
                format!("Failed to save task state: {}", e)
            })
    }

    fn record(&self, result: RunnerTaskResult) -> Result<(), RunnerError> {
        lock(&self.log).record_task(result).map_err(RunnerError::Report)
    }

    /// Drive one task through its stages. Per-task failures, including failed
    /// saves, are recorded; only policy errors abort the run.
    async fn process_task(
        &self,
        task: Task,
        cancel: &CancellationToken,
    ) -> Result<TaskEnd, RunnerError> {
        if !task.stage.is_executable() {
            debug!(task_id = %task.id, stage = %task.stage, "stage not executable; skipping");
            return Ok(TaskEnd::Skipped);
        }

        let started = Instant::now();
        let agent_name = task
            .agent
            .clone()
            .or_else(|| task.provider.clone())
            .unwrap_or_else(|| self.settings.default_agent.clone());

        let mut result = RunnerTaskResult::new(&task.id, task.display_title(), TaskStatus::Failed);
        result.provider = task.provider.clone();
        result.agent = Some(agent_name.clone());

        let mut current = task.clone();
        let mut reworks = 0u32;

        let status = loop {
            if cancel.is_cancelled() {
                result.error = Some(format!("stopped during {}", current.stage));
                break TaskStatus::Failed;
            }
            let stage = current.stage;
            self.publish(RunnerState {
                is_running: true,
                active_task_id: Some(current.id.clone()),
                active_stage: Some(stage),
            });

            let profile = match self.parts.resolver.resolve(&agent_name, stage) {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(task_id = %current.id, %stage, error = %e, "profile resolution failed");
                    result.error = Some(e.to_string());
                    break error_status(&e);
                }
            };
            let prompt = match self.parts.assembler.build_prompt(&current).await {
                Ok(prompt) => prompt,
                Err(e) => {
                    warn!(task_id = %current.id, %stage, error = %e, "prompt assembly failed");
                    result.error = Some(e.to_string());
                    break error_status(&e);
                }
            };

            current.attempts += 1;
            let attempt = current.attempts;
            let transcript_path = self.settings.save_transcripts.then(|| {
                lock(&self.log)
                    .run_dir(&self.settings.root)
                    .join(format!("{}-{}-{}.log", current.id, stage, attempt))
            });
            info!(task_id = %current.id, %stage, attempt, agent = %profile.name, "running attempt");

            let request = AttemptRequest {
                task_id: current.id.clone(),
                stage,
                attempt,
                profile,
                prompt,
                workdir: self.settings.workdir.clone(),
                transcript_path,
            };
            let report = self.parts.supervisor.run_attempt(request, cancel.clone()).await;
            accumulate(&mut result, &report);

            if report.exit == AttemptExit::Cancelled {
                result.stages.push(stage_record(stage, "stopped".to_string(), &report));
                result.error = Some(match self.persist(&current.id, stage, attempt).await {
                    Ok(()) => format!("stopped during {}", stage),
                    Err(e) => e,
                });
                break TaskStatus::Failed;
            }

            let (outcome, error) = classify(stage, &report);
            let transition = next_transition(
                stage,
                outcome,
                RetryBudget {
                    attempts: attempt,
                    max_attempts: self.settings.max_attempts,
                },
            )?;

            let mut label = transition.label(stage);
            let mut rework_exhausted = false;
            if let Transition::SendBack(_) = transition {
                reworks += 1;
                if reworks > self.settings.max_reworks {
                    rework_exhausted = true;
                    label = "failed".to_string();
                }
            }

            let next = transition.next_stage(stage);
            if let Err(e) = self.persist(&current.id, next, attempt).await {
                result.stages.push(stage_record(stage, "failed".to_string(), &report));
                result.error = Some(e);
                break TaskStatus::Failed;
            }
            result.stages.push(stage_record(stage, label, &report));
            debug!(task_id = %current.id, from = %stage, to = %next, %outcome, "stage transition");

            if rework_exhausted {
                result.error = Some(format!("audit requested rework {} times", reworks));
                current.stage = next;
                break TaskStatus::Failed;
            }

            match transition {
                Transition::Complete => {
                    current.stage = next;
                    result.error = None;
                    break TaskStatus::Completed;
                }
                Transition::Exhausted => {
                    result.error = error.map(|e| {
                        format!("{} (gave up after {} attempts)", e, attempt)
                    });
                    break TaskStatus::Failed;
                }
                Transition::Abort => {
                    result.error = error.map(|e| e.to_string());
                    break TaskStatus::Crashed;
                }
                Transition::Retry => {
                    if let Some(e) = &error {
                        warn!(task_id = %current.id, %stage, attempt, error = %e, "attempt failed; retrying");
                    }
                }
                Transition::Advance(_) | Transition::SendBack(_) => {
                    current.stage = next;
                }
            }
        };

        result.status = status;
        result.attempts = current.attempts;
        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            task_id = %result.task_id,
            status = %result.status,
            attempts = result.attempts,
            "task finished"
        );
        self.record(result)?;
        Ok(TaskEnd::Recorded(status))
    }
}

/// Map an attempt report onto a policy outcome.
fn classify(stage: Stage, report: &AttemptReport) -> (AttemptOutcome, Option<AttemptError>) {
    match report.exit {
        AttemptExit::Completed if stage == Stage::Audit => match report.verdict {
            Some(Verdict::Accept) => (AttemptOutcome::Accepted, None),
            Some(Verdict::Rework) => (AttemptOutcome::NeedsWork, None),
            None => (
                AttemptOutcome::Failed,
                Some(AttemptError::UnparsableOutput(
                    "audit produced no recognizable verdict".to_string(),
                )),
            ),
        },
        AttemptExit::Completed => (AttemptOutcome::Success, None),
        AttemptExit::Failed | AttemptExit::Crashed => {
            let crashed = report.exit == AttemptExit::Crashed
                || report.error.as_ref().is_some_and(AttemptError::is_crash);
            let outcome = if crashed {
                AttemptOutcome::Crashed
            } else {
                AttemptOutcome::Failed
            };
            (outcome, report.error.clone())
        }
        // Handled before classification
        AttemptExit::Cancelled => (AttemptOutcome::Failed, None),
    }
}

/// Status of a task that ended before its attempt could start.
fn error_status(error: &AttemptError) -> TaskStatus {
    if error.is_crash() {
        TaskStatus::Crashed
    } else {
        TaskStatus::Failed
    }
}

fn accumulate(result: &mut RunnerTaskResult, report: &AttemptReport) {
    if let Some(n) = report.tokens_in {
        result.tokens_in = Some(result.tokens_in.unwrap_or(0) + n);
    }
    if let Some(n) = report.tokens_out {
        result.tokens_out = Some(result.tokens_out.unwrap_or(0) + n);
    }
    if report.commit.is_some() {
        result.commit = report.commit.clone();
    }
}

fn stage_record(stage: Stage, transition: String, report: &AttemptReport) -> StageRecord {
    let audit = stage == Stage::Audit;
    StageRecord {
        stage: stage.as_str().to_string(),
        transition,
        files_changed: report.files_changed.iter().cloned().collect(),
        audit_rating: if audit { report.audit_rating } else { None },
        audit_verdict: if audit { report.audit_verdict.clone() } else { None },
        output_file: report
            .audit_report
            .clone()
            .filter(|_| audit)
            .or_else(|| report.output_file.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::profile::{AgentConfig, ConfigProfileResolver};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryStore {
        tasks: Mutex<BTreeMap<String, Task>>,
        saves: Mutex<Vec<(String, Stage, u32)>>,
        read_only: Mutex<Vec<String>>,
    }

    impl MemoryStore {
        fn with(tasks: Vec<Task>) -> Self {
            let store = Self::default();
            for task in tasks {
                store.tasks.lock().unwrap().insert(task.id.clone(), task);
            }
            store
        }

        /// Make every save of `id` fail.
        fn lock_task(&self, id: &str) {
            self.read_only.lock().unwrap().push(id.to_string());
        }

        fn saves(&self) -> Vec<(String, Stage, u32)> {
            self.saves.lock().unwrap().clone()
        }

        fn get(&self, id: &str) -> Task {
            self.tasks.lock().unwrap()[id].clone()
        }
    }

    #[async_trait]
    impl TaskStore for MemoryStore {
        async fn load_task(&self, id: &str) -> Result<Task, StoreError> {
            self.tasks
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        }

        async fn save_task_stage(
            &self,
            id: &str,
            stage: Stage,
            attempts: u32,
        ) -> Result<(), StoreError> {
            if self.read_only.lock().unwrap().iter().any(|r| r == id) {
                return Err(StoreError::Io {
                    path: PathBuf::from(format!("{}.md", id)),
                    source: std::io::Error::other("read-only file system"),
                });
            }
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            task.stage = stage;
            task.attempts = attempts;
            self.saves.lock().unwrap().push((id.to_string(), stage, attempts));
            Ok(())
        }

        async fn list_tasks(&self, stage: Option<Stage>) -> Result<Vec<Task>, StoreError> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| stage.is_none_or(|s| t.stage == s))
                .cloned()
                .collect())
        }
    }

    struct EchoAssembler;

    #[async_trait]
    impl PromptAssembler for EchoAssembler {
        async fn build_prompt(&self, task: &Task) -> Result<String, AttemptError> {
            Ok(format!("{} at {}", task.id, task.stage))
        }
    }

    enum Step {
        Report(AttemptReport),
        WaitForCancel,
    }

    #[derive(Default)]
    struct ScriptedSupervisor {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<(String, Stage, u32, Option<PathBuf>)>>,
        kills: AtomicUsize,
    }

    impl ScriptedSupervisor {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, Stage)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(id, stage, _, _)| (id.clone(), *stage))
                .collect()
        }
    }

    #[async_trait]
    impl ProcessSupervisor for ScriptedSupervisor {
        async fn run_attempt(
            &self,
            request: AttemptRequest,
            cancel: CancellationToken,
        ) -> AttemptReport {
            self.calls.lock().unwrap().push((
                request.task_id.clone(),
                request.stage,
                request.attempt,
                request.transcript_path.clone(),
            ));
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Report(report)) => report,
                Some(Step::WaitForCancel) => {
                    cancel.cancelled().await;
                    self.kills.fetch_add(1, Ordering::SeqCst);
                    AttemptReport::cancelled(Duration::from_millis(1))
                }
                None => panic!("unexpected attempt for {}", request.task_id),
            }
        }
    }

    fn ok() -> Step {
        let mut report = AttemptReport::new(AttemptExit::Completed, Duration::from_millis(5));
        report.tokens_in = Some(1000);
        report.tokens_out = Some(100);
        Step::Report(report)
    }

    fn committed(sha: &str) -> Step {
        let mut report = AttemptReport::new(AttemptExit::Completed, Duration::from_millis(5));
        report.commit = Some(sha.to_string());
        report.files_changed.insert("src/lib.rs".to_string());
        Step::Report(report)
    }

    fn verdict(raw: &str, rating: u8) -> Step {
        let mut report = AttemptReport::new(AttemptExit::Completed, Duration::from_millis(5));
        report.audit_verdict = Some(raw.to_string());
        report.verdict = Verdict::classify(raw);
        report.audit_rating = Some(rating);
        Step::Report(report)
    }

    fn failed() -> Step {
        let mut report = AttemptReport::new(AttemptExit::Failed, Duration::from_millis(5));
        report.error = Some(AttemptError::ProcessTimeout(Duration::from_secs(60)));
        Step::Report(report)
    }

    fn crashed() -> Step {
        Step::Report(AttemptReport::crashed(
            AttemptError::ProcessLaunch {
                cli: "claude".into(),
                message: "No such file or directory".into(),
            },
            Duration::ZERO,
        ))
    }

    fn task(id: &str, stage: Stage) -> Task {
        Task::new(id, format!("Task {}", id), stage)
    }

    struct Harness {
        engine: Arc<RunnerEngine>,
        store: Arc<MemoryStore>,
        supervisor: Arc<ScriptedSupervisor>,
        _root: TempDir,
    }

    fn harness(
        tasks: Vec<Task>,
        steps: Vec<Step>,
        tweak: impl FnOnce(&mut RunnerSettings),
    ) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with(tasks));
        let supervisor = Arc::new(ScriptedSupervisor::new(steps));
        let mut agents = BTreeMap::new();
        agents.insert("claude".to_string(), AgentConfig::claude());
        let mut settings = RunnerSettings {
            max_attempts: 10,
            max_reworks: 2,
            default_agent: "claude".to_string(),
            root: root.path().to_path_buf(),
            workdir: root.path().to_path_buf(),
            save_transcripts: false,
        };
        tweak(&mut settings);
        let parts = Collaborators {
            store: store.clone(),
            assembler: Arc::new(EchoAssembler),
            resolver: Arc::new(ConfigProfileResolver::new(agents)),
            supervisor: supervisor.clone(),
        };
        let engine = RunnerEngine::new(parts, settings).with_guard(Arc::new(RunGuard::new()));
        Harness {
            engine: Arc::new(engine),
            store,
            supervisor,
            _root: root,
        }
    }

    #[tokio::test]
    async fn task_runs_plan_to_completed() {
        let h = harness(
            vec![task("t-1", Stage::Plan)],
            vec![ok(), committed("abc1234"), verdict("PASS", 9)],
            |_| {},
        );

        let outcome = h.engine.run_task("t-1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(!outcome.has_failures());
        assert_eq!(
            h.store.saves(),
            vec![
                ("t-1".to_string(), Stage::Code, 1),
                ("t-1".to_string(), Stage::Audit, 2),
                ("t-1".to_string(), Stage::Completed, 3),
            ]
        );

        let result = &outcome.tasks[0];
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.commit.as_deref(), Some("abc1234"));
        assert_eq!(result.tokens_in, Some(1000));
        assert_eq!(result.agent.as_deref(), Some("claude"));
        assert_eq!(result.error, None);
        let labels: Vec<(&str, &str)> = result
            .stages
            .iter()
            .map(|s| (s.stage.as_str(), s.transition.as_str()))
            .collect();
        assert_eq!(
            labels,
            vec![("plan", "code"), ("code", "audit"), ("audit", "completed")]
        );
        assert_eq!(result.stages[2].audit_rating, Some(9));

        let report = std::fs::read_to_string(&outcome.report_path).unwrap();
        assert!(report.contains("| Completed | 1 |"));
        assert!(report.contains("| Finish reason | completed |"));
    }

    #[tokio::test]
    async fn needs_work_routes_back_to_code() {
        let h = harness(
            vec![task("t-1", Stage::Audit)],
            vec![verdict("NEEDS_WORK", 5), ok(), verdict("PASS", 8)],
            |_| {},
        );

        let outcome = h.engine.run_task("t-1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(h.store.saves()[0], ("t-1".to_string(), Stage::Code, 1));

        let first = &outcome.tasks[0].stages[0];
        assert_eq!(first.stage, "audit");
        assert_eq!(first.audit_verdict.as_deref(), Some("NEEDS_WORK"));
        assert_eq!(first.transition, "code");
        assert_eq!(
            h.supervisor.calls(),
            vec![
                ("t-1".to_string(), Stage::Audit),
                ("t-1".to_string(), Stage::Code),
                ("t-1".to_string(), Stage::Audit),
            ]
        );
    }

    #[tokio::test]
    async fn rework_loop_is_bounded() {
        let h = harness(
            vec![task("t-1", Stage::Audit)],
            vec![verdict("REWORK", 3), ok(), verdict("REWORK", 4)],
            |s| s.max_reworks = 1,
        );

        let outcome = h.engine.run_task("t-1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        let result = &outcome.tasks[0];
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("audit requested rework 2 times"));
        assert_eq!(result.stages.last().unwrap().transition, "failed");
        assert_eq!(h.store.get("t-1").stage, Stage::Code);
    }

    #[tokio::test]
    async fn failures_retry_until_ceiling() {
        let h = harness(
            vec![task("t-1", Stage::Code)],
            vec![failed(), failed(), failed()],
            |s| s.max_attempts = 2,
        );

        let outcome = h.engine.run_task("t-1").await.unwrap();
        let result = &outcome.tasks[0];
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.attempts, 3);
        assert_eq!(
            result.error.as_deref(),
            Some("Process timed out after 60s (gave up after 3 attempts)")
        );
        assert_eq!(h.store.get("t-1").stage, Stage::Code);
        assert_eq!(h.store.get("t-1").attempts, 3);
        assert_eq!(result.stages[0].transition, "code (retry)");
        assert_eq!(result.stages[2].transition, "failed");
    }

    #[tokio::test]
    async fn retry_then_success_clears_error() {
        let h = harness(
            vec![task("t-1", Stage::Audit)],
            vec![failed(), verdict("LGTM", 10)],
            |_| {},
        );
        let outcome = h.engine.run_task("t-1").await.unwrap();
        assert_eq!(outcome.tasks[0].status, TaskStatus::Completed);
        assert_eq!(outcome.tasks[0].error, None);
    }

    #[tokio::test]
    async fn supervisor_crash_is_not_retried() {
        let h = harness(vec![task("t-1", Stage::Plan)], vec![crashed()], |_| {});

        let outcome = h.engine.run_task("t-1").await.unwrap();
        let result = &outcome.tasks[0];
        assert_eq!(result.status, TaskStatus::Crashed);
        assert!(result.error.as_deref().unwrap().contains("Failed to launch"));
        assert_eq!(h.supervisor.calls().len(), 1);
        assert_eq!(h.store.get("t-1").stage, Stage::Plan);
    }

    #[tokio::test]
    async fn unknown_profile_crashes_task_and_column_continues() {
        let mut ghost = task("a-ghost", Stage::Plan);
        ghost.agent = Some("ghost".to_string());
        let h = harness(
            vec![ghost, task("b-real", Stage::Plan)],
            vec![ok(), ok(), verdict("PASS", 7)],
            |_| {},
        );

        let outcome = h.engine.run_column(Stage::Plan).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.has_failures());
        assert_eq!(outcome.tasks.len(), 2);
        assert_eq!(outcome.tasks[0].status, TaskStatus::Crashed);
        assert_eq!(
            outcome.tasks[0].error.as_deref(),
            Some("No agent profile named 'ghost' for stage plan")
        );
        assert!(outcome.tasks[0].stages.is_empty());
        assert_eq!(outcome.tasks[1].status, TaskStatus::Completed);
        assert_eq!(h.store.get("a-ghost").attempts, 0);
    }

    #[tokio::test]
    async fn failed_save_is_recorded_and_column_continues() {
        let h = harness(
            vec![task("a", Stage::Code), task("b", Stage::Code)],
            vec![ok(), ok(), verdict("PASS", 8)],
            |_| {},
        );
        h.store.lock_task("a");

        let outcome = h.engine.run_column(Stage::Code).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.tasks.len(), 2);

        let a = &outcome.tasks[0];
        assert_eq!(a.status, TaskStatus::Failed);
        assert_eq!(a.attempts, 1);
        assert_eq!(
            a.error.as_deref(),
            Some("Failed to save task state: Task store I/O error at a.md: read-only file system")
        );
        assert_eq!(a.stages.len(), 1);
        assert_eq!(a.stages[0].transition, "failed");

        assert_eq!(outcome.tasks[1].task_id, "b");
        assert_eq!(outcome.tasks[1].status, TaskStatus::Completed);
        assert_eq!(h.supervisor.calls().len(), 3);

        let report = std::fs::read_to_string(&outcome.report_path).unwrap();
        assert!(report.contains("| Tasks processed | 2 |"));
        assert!(report.contains("| Failed | 1 |"));
        assert!(report.contains("read-only file system"));
    }

    #[test]
    fn launch_error_on_failed_exit_counts_as_crash() {
        let mut report = AttemptReport::new(AttemptExit::Failed, Duration::ZERO);
        report.error = Some(AttemptError::ProcessLaunch {
            cli: "claude".into(),
            message: "gone".into(),
        });
        assert_eq!(classify(Stage::Code, &report).0, AttemptOutcome::Crashed);

        report.error = Some(AttemptError::ProcessTimeout(Duration::from_secs(1)));
        assert_eq!(classify(Stage::Code, &report).0, AttemptOutcome::Failed);
    }

    #[tokio::test]
    async fn column_uses_snapshot_and_skips_other_stages() {
        let h = harness(
            vec![task("a", Stage::Code), task("b", Stage::Plan), task("c", Stage::Code)],
            vec![ok(), verdict("PASS", 8), ok(), verdict("PASS", 8)],
            |_| {},
        );
        let outcome = h.engine.run_column(Stage::Code).await.unwrap();
        let ids: Vec<&str> = outcome.tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(h.store.get("b").stage, Stage::Plan);
    }

    #[tokio::test]
    async fn empty_column_writes_zero_task_report() {
        let h = harness(vec![task("t-1", Stage::Inbox)], vec![], |_| {});
        let outcome = h.engine.run_column(Stage::Audit).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.tasks.is_empty());
        let report = std::fs::read_to_string(&outcome.report_path).unwrap();
        assert!(report.contains("_No tasks were processed in this run._"));
    }

    #[tokio::test]
    async fn run_task_on_parked_task_is_noop() {
        let h = harness(vec![task("t-1", Stage::Inbox)], vec![], |_| {});
        let outcome = h.engine.run_task("t-1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.tasks.is_empty());
        assert!(h.supervisor.calls().is_empty());
        assert!(h.store.saves().is_empty());
    }

    #[tokio::test]
    async fn missing_task_fails_run_but_releases_guard() {
        let h = harness(vec![], vec![], |_| {});
        let err = h.engine.run_task("nope").await.unwrap_err();
        assert!(matches!(err, RunnerError::Store(StoreError::NotFound(_))));
        assert!(!h.engine.is_running());
        assert!(!h.engine.stop());
    }

    #[tokio::test]
    async fn second_run_is_rejected_and_stop_kills_once() {
        let h = harness(
            vec![task("t-1", Stage::Code), task("t-2", Stage::Code)],
            vec![Step::WaitForCancel],
            |_| {},
        );
        assert!(!h.engine.stop());

        let mut events = h.engine.subscribe();
        let engine = Arc::clone(&h.engine);
        let first = tokio::spawn(async move { engine.run_column(Stage::Code).await });

        // Wait until the first task's attempt is underway
        loop {
            let state = events.recv().await.unwrap();
            if state.active_task_id.as_deref() == Some("t-1") {
                break;
            }
        }

        let err = h.engine.run_task("t-2").await.unwrap_err();
        assert!(matches!(err, RunnerError::AlreadyActive));
        let err = h.engine.run_column(Stage::Plan).await.unwrap_err();
        assert!(matches!(err, RunnerError::AlreadyActive));

        let live = h.engine.report_markdown();
        assert!(live.contains("| Tasks processed | 0 |"));
        assert!(live.contains("| Finish reason | - |"));
        assert!(h.engine.is_running());

        assert!(h.engine.stop());
        assert!(h.engine.stop());

        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.status, RunStatus::Stopped);
        assert_eq!(h.supervisor.kills.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(outcome.tasks[0].status, TaskStatus::Failed);
        assert_eq!(outcome.tasks[0].error.as_deref(), Some("stopped during code"));
        assert_eq!(h.supervisor.calls().len(), 1);

        let report = std::fs::read_to_string(&outcome.report_path).unwrap();
        assert!(report.contains("| Finish reason | stopped |"));

        assert!(!h.engine.stop());
        assert!(!h.engine.is_running());
        assert_eq!(h.engine.state(), RunnerState::default());
    }

    #[tokio::test]
    async fn events_bracket_the_run() {
        let h = harness(
            vec![task("t-1", Stage::Audit)],
            vec![failed(), verdict("PASS", 9)],
            |_| {},
        );
        let mut events = h.engine.subscribe();
        h.engine.run_task("t-1").await.unwrap();

        let mut seen = Vec::new();
        while let Ok(state) = events.try_recv() {
            seen.push(state);
        }
        assert!(seen.first().unwrap().is_running);
        assert_eq!(seen.last().unwrap(), &RunnerState::default());
        let audits = seen
            .iter()
            .filter(|s| s.active_stage == Some(Stage::Audit))
            .count();
        assert_eq!(audits, 2);
    }

    #[tokio::test]
    async fn transcripts_are_named_per_attempt() {
        let h = harness(vec![task("t-1", Stage::Plan)], vec![crashed()], |s| {
            s.save_transcripts = true
        });
        h.engine.run_task("t-1").await.unwrap();
        let calls = h.supervisor.calls.lock().unwrap().clone();
        let path = calls[0].3.clone().unwrap();
        assert!(path.ends_with("t-1-plan-1.log"));
        assert!(path.to_string_lossy().contains(".nightshift/logs/"));
    }
}
