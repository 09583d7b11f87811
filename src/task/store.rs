//! Markdown task store.
//!
//! Each task is a Markdown file under `.nightshift/tasks/` with a YAML
//! frontmatter block:
//!
//! ```markdown
//! ---
//! id: fix-login
//! title: Fix the login redirect
//! stage: plan
//! agent: claude
//! attempts: 0
//! ---
//! Users bounce back to /login after a successful sign-in.
//! ```
//!
//! The runner only ever touches `stage`, `attempts` and `updated`; every other
//! key (including ones this crate does not know about) is preserved verbatim.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use super::{Stage, Task};
use crate::errors::StoreError;

/// The name of the tasks directory within `.nightshift`
pub const TASKS_DIR: &str = "tasks";

const DELIMITER: &str = "---";

/// Persistence seam consumed by the runner engine.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load_task(&self, id: &str) -> Result<Task, StoreError>;

    async fn save_task_stage(&self, id: &str, stage: Stage, attempts: u32)
    -> Result<(), StoreError>;

    /// Tasks currently in `stage` (all tasks when `None`), ordered by file path.
    async fn list_tasks(&self, stage: Option<Stage>) -> Result<Vec<Task>, StoreError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Frontmatter {
    id: Option<String>,
    title: Option<String>,
    stage: Option<Stage>,
    project: Option<String>,
    phase: Option<String>,
    agent: Option<String>,
    provider: Option<String>,
    parent: Option<String>,
    tags: Vec<String>,
    contexts: Vec<String>,
    skills: Vec<String>,
    attempts: u32,
}

/// File-backed [`TaskStore`] rooted at a tasks directory.
#[derive(Debug, Clone)]
pub struct MarkdownTaskStore {
    tasks_dir: PathBuf,
}

impl MarkdownTaskStore {
    pub fn new(tasks_dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
        }
    }

    /// Store rooted at `<nightshift_dir>/tasks`.
    pub fn in_workspace(nightshift_dir: &Path) -> Self {
        Self::new(nightshift_dir.join(TASKS_DIR))
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    /// Run blocking filesystem work off the async runtime.
    async fn blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Path) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let dir = self.tasks_dir.clone();
        tokio::task::spawn_blocking(move || f(&dir))
            .await
            .context("Task store worker panicked")?
    }
}

#[async_trait]
impl TaskStore for MarkdownTaskStore {
    async fn load_task(&self, id: &str) -> Result<Task, StoreError> {
        let id = id.to_string();
        self.blocking(move |dir| find_task(dir, &id)).await
    }

    async fn save_task_stage(
        &self,
        id: &str,
        stage: Stage,
        attempts: u32,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.blocking(move |dir| {
            let task = find_task(dir, &id)?;
            rewrite_pipeline_state(&task.file_path, stage, attempts)?;
            debug!(task_id = %id, %stage, attempts, "saved task stage");
            Ok(())
        })
        .await
    }

    async fn list_tasks(&self, stage: Option<Stage>) -> Result<Vec<Task>, StoreError> {
        self.blocking(move |dir| {
            let tasks = scan_tasks(dir)?;
            Ok(tasks
                .into_iter()
                .filter(|t| stage.is_none_or(|s| t.stage == s))
                .collect())
        })
        .await
    }
}

fn task_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let pattern = dir.join("**").join("*.md").to_string_lossy().to_string();
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .context("Invalid task glob pattern")?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Every readable task under `dir`. Files that fail to parse are skipped so
/// one broken task cannot hide the rest of the board.
fn scan_tasks(dir: &Path) -> Result<Vec<Task>, StoreError> {
    let mut tasks = Vec::new();
    for path in task_files(dir)? {
        match read_task(&path) {
            Ok(task) => tasks.push(task),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable task file"),
        }
    }
    Ok(tasks)
}

fn find_task(dir: &Path, id: &str) -> Result<Task, StoreError> {
    // Fast path: file named after the id.
    let direct = dir.join(format!("{}.md", id));
    if direct.is_file() {
        let task = read_task(&direct)?;
        if task.id == id {
            return Ok(task);
        }
    }
    scan_tasks(dir)?
        .into_iter()
        .find(|task| task.id == id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
}

fn read_task(path: &Path) -> Result<Task, StoreError> {
    let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_task(path, &raw)
}

/// Split a document into `(frontmatter, body)`. Documents without a leading
/// `---` line have no frontmatter.
fn split_frontmatter(raw: &str) -> Option<(&str, &str)> {
    let rest = raw
        .strip_prefix("---\r\n")
        .or_else(|| raw.strip_prefix("---\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == DELIMITER {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

pub(crate) fn parse_task(path: &Path, raw: &str) -> Result<Task, StoreError> {
    let (front, body) = match split_frontmatter(raw) {
        Some((yaml, body)) if !yaml.trim().is_empty() => {
            let front: Frontmatter =
                serde_yaml::from_str(yaml).map_err(|e| StoreError::Frontmatter {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
            (front, body)
        }
        Some((_, body)) => (Frontmatter::default(), body),
        None => (Frontmatter::default(), raw),
    };

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let id = front.id.filter(|s| !s.trim().is_empty()).unwrap_or(stem);
    let title = front.title.unwrap_or_else(|| id.clone());

    Ok(Task {
        file_path: path.to_path_buf(),
        title,
        stage: front.stage.unwrap_or(Stage::Inbox),
        project: front.project,
        phase: front.phase,
        agent: front.agent,
        provider: front.provider,
        parent: front.parent,
        tags: front.tags,
        contexts: front.contexts,
        skills: front.skills,
        attempts: front.attempts,
        content: body.trim_start_matches(['\r', '\n']).to_string(),
        id,
    })
}

/// Replace `stage`/`attempts`/`updated` in the frontmatter, keeping all other
/// keys and the body untouched.
pub(crate) fn render_with_pipeline_state(
    path: &Path,
    raw: &str,
    stage: Stage,
    attempts: u32,
    updated: &str,
) -> Result<String, StoreError> {
    let (mut mapping, body) = match split_frontmatter(raw) {
        Some((yaml, body)) => {
            let mapping = if yaml.trim().is_empty() {
                Mapping::new()
            } else {
                serde_yaml::from_str::<Mapping>(yaml).map_err(|e| StoreError::Frontmatter {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
            };
            (mapping, body.to_string())
        }
        None => (Mapping::new(), format!("\n{}", raw)),
    };

    mapping.insert(Value::from("stage"), Value::from(stage.as_str()));
    mapping.insert(Value::from("attempts"), Value::from(attempts));
    mapping.insert(Value::from("updated"), Value::from(updated));

    let yaml = serde_yaml::to_string(&mapping).map_err(|e| StoreError::Frontmatter {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{body}"))
}

fn rewrite_pipeline_state(path: &Path, stage: Stage, attempts: u32) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let raw = fs::read_to_string(path).map_err(io_err)?;
    let updated = chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false);
    let rendered = render_with_pipeline_state(path, &raw, stage, attempts, &updated)?;

    let tmp_path = path.with_extension("md.tmp");
    fs::write(&tmp_path, rendered).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}
