//! Task and stage model.
//!
//! A task moves through a fixed five-stage pipeline:
//!
//! ```text
//! inbox → plan → code → audit → completed
//! ```
//!
//! Only `plan`, `code` and `audit` are executed by the runner; `inbox` is a
//! parking lot and `completed` is terminal.

pub mod store;

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use store::{MarkdownTaskStore, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Inbox,
    Plan,
    Code,
    Audit,
    Completed,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Inbox,
        Stage::Plan,
        Stage::Code,
        Stage::Audit,
        Stage::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Plan => "plan",
            Self::Code => "code",
            Self::Audit => "audit",
            Self::Completed => "completed",
        }
    }

    /// Whether the runner invokes an agent for tasks sitting in this stage.
    pub fn is_executable(&self) -> bool {
        matches!(self, Self::Plan | Self::Code | Self::Audit)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inbox" => Ok(Self::Inbox),
            "plan" => Ok(Self::Plan),
            "code" => Ok(Self::Code),
            "audit" => Ok(Self::Audit),
            "completed" => Ok(Self::Completed),
            other => Err(format!(
                "Invalid stage '{}'. Valid values: inbox, plan, code, audit, completed",
                other
            )),
        }
    }
}

/// A queued work item, as loaded from the task store.
///
/// The runner treats a `Task` as a value: it reads it, then hands a new
/// `stage`/`attempts` pair back to the store. The store owns the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Store-specific locator; opaque to the runner.
    pub file_path: PathBuf,
    pub title: String,
    pub stage: Stage,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub contexts: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub content: String,
}

impl Task {
    /// Minimal task, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<String>, title: impl Into<String>, stage: Stage) -> Self {
        let id = id.into();
        Self {
            file_path: PathBuf::from(format!("{}.md", id)),
            id,
            title: title.into(),
            stage,
            project: None,
            phase: None,
            agent: None,
            provider: None,
            parent: None,
            tags: Vec::new(),
            contexts: Vec::new(),
            skills: Vec::new(),
            attempts: 0,
            content: String::new(),
        }
    }

    /// Title shown in reports, falling back to the id for untitled tasks.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}
