//! Signal types emitted by agents in their final output.

use serde::{Deserialize, Serialize};

/// How an audit verdict steers the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The work is accepted; the task completes
    Accept,
    /// The auditor wants changes; the task goes back to `code`
    Rework,
}

impl Verdict {
    /// Classify a free-form verdict word.
    ///
    /// Matching ignores case and treats `-` and spaces as `_`, so
    /// `needs work`, `Needs-Work` and `NEEDS_WORK` are the same verdict.
    pub fn classify(raw: &str) -> Option<Verdict> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        match normalized.as_str() {
            "PASS" | "PASSED" | "APPROVED" | "APPROVE" | "ACCEPT" | "ACCEPTED" | "LGTM"
            | "DONE" => Some(Verdict::Accept),
            "NEEDS_WORK" | "REWORK" | "FAIL" | "FAILED" | "REJECT" | "REJECTED"
            | "CHANGES_REQUESTED" => Some(Verdict::Rework),
            _ => None,
        }
    }
}

/// Tags found in one attempt's output. Later tags win over earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSignals {
    /// `<commit>sha</commit>`
    pub commit: Option<String>,
    /// `<rating>8</rating>` or `<rating>8/10</rating>`, clamped to 10
    pub rating: Option<u8>,
    /// Raw text of `<verdict>...</verdict>`
    pub verdict: Option<String>,
    /// `<audit-report>path</audit-report>`
    pub audit_report: Option<String>,
    /// `<file-changed>path</file-changed>`, for tools without structured output
    pub files_changed: Vec<String>,
}

impl AgentSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_signals(&self) -> bool {
        self.commit.is_some()
            || self.rating.is_some()
            || self.verdict.is_some()
            || self.audit_report.is_some()
            || !self.files_changed.is_empty()
    }

    /// Classified verdict, if one was emitted and recognized.
    pub fn classified_verdict(&self) -> Option<Verdict> {
        self.verdict.as_deref().and_then(Verdict::classify)
    }
}
