//! Run log: per-task results of one night-shift run, rendered as a Markdown
//! report under `.nightshift/logs/`.

mod logger;

pub use logger::{LogState, REPORT_JSON, RunnerLog, list_reports, logs_dir};

use serde::{Deserialize, Serialize};

/// Final status of one task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Crashed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Completed,
    Stopped,
    Failed,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed stage of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    /// Where the task went: the next stage, `completed`, `failed`, or `<stage> (retry)`
    pub transition: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_changed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_verdict: Option<String>,
    /// Audit report path, or the attempt transcript
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
}

impl StageRecord {
    fn render(&self) -> String {
        let mut details = Vec::new();
        if let Some(rating) = self.audit_rating {
            details.push(format!("rating {}/10", rating));
        }
        if let Some(verdict) = &self.audit_verdict {
            details.push(format!("verdict {}", verdict));
        }
        if !self.files_changed.is_empty() {
            details.push(format!("files: {}", self.files_changed.join(", ")));
        }
        if let Some(output) = &self.output_file {
            details.push(format!("output: {}", output));
        }

        let mut out = format!("{} → {}", self.stage, self.transition);
        if !details.is_empty() {
            out.push_str(&format!(" ({})", details.join("; ")));
        }
        out
    }
}

/// Everything recorded about one task at the end of its processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerTaskResult {
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub provider: Option<String>,
    pub agent: Option<String>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub duration_ms: u64,
    pub commit: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
    #[serde(default)]
    pub stages: Vec<StageRecord>,
}

impl RunnerTaskResult {
    pub fn new(task_id: impl Into<String>, title: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            status,
            provider: None,
            agent: None,
            tokens_in: None,
            tokens_out: None,
            duration_ms: 0,
            commit: None,
            attempts: 0,
            error: None,
            stages: Vec::new(),
        }
    }

    fn heading(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.task_id
        } else {
            &self.title
        }
    }

    pub(crate) fn render(&self, out: &mut String) {
        let dash = |v: Option<&str>| v.unwrap_or("-").to_string();

        out.push_str(&format!("### {}\n\n", self.heading()));
        out.push_str(&format!("- **Task:** {}\n", self.task_id));
        out.push_str(&format!("- **Status:** {}\n", self.status));
        out.push_str(&format!("- **Provider:** {}\n", dash(self.provider.as_deref())));
        out.push_str(&format!("- **Agent:** {}\n", dash(self.agent.as_deref())));
        out.push_str(&format!(
            "- **Tokens:** {}\n",
            format_tokens(self.tokens_in, self.tokens_out)
        ));
        out.push_str(&format!("- **Time:** {}\n", format_duration(self.duration_ms)));
        out.push_str(&format!("- **Commit:** {}\n", dash(self.commit.as_deref())));
        out.push_str(&format!("- **Attempts:** {}\n", self.attempts));
        out.push_str(&format!("- **Error:** {}\n", dash(self.error.as_deref())));
        if !self.stages.is_empty() {
            let stages: Vec<String> = self.stages.iter().map(StageRecord::render).collect();
            out.push_str(&format!("- **Stages:** {}\n", stages.join(" | ")));
        }
    }
}

/// `12,450 in / 3,200 out`, or `-` when neither count is known.
pub fn format_tokens(tokens_in: Option<u64>, tokens_out: Option<u64>) -> String {
    if tokens_in.is_none() && tokens_out.is_none() {
        return "-".to_string();
    }
    format!(
        "{} in / {} out",
        with_thousands(tokens_in.unwrap_or(0)),
        with_thousands(tokens_out.unwrap_or(0))
    )
}

/// `<m>m <ss>s`, e.g. 492000 ms is `8m 12s`.
pub fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}m {:02}s", secs / 60, secs % 60)
}

fn with_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
