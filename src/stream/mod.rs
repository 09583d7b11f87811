//! Structured output from agent CLIs.
//!
//! Claude's `stream-json` and Codex's `--json` both print one JSON object per
//! line. [`OutputSummary::parse`] folds those lines into the facts the runner
//! needs: files touched, token usage, turn count, cost and the final text.
//! Lines that are not JSON, or events of an unknown type, are skipped.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Tools whose `file_path` input names a file they modify.
const WRITE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// One line of agent output.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        usage: Option<Usage>,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },

    /// Codex: an agent message, command or file change finished
    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexItem },

    /// Codex: end of one model turn, with usage for that turn
    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: Option<Usage>,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct CodexItem {
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub changes: Vec<CodexFileChange>,
}

#[derive(Debug, Deserialize)]
pub struct CodexFileChange {
    pub path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Everything extracted from one attempt's stdout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSummary {
    /// Number of lines that parsed as a known or unknown JSON event
    pub events: usize,
    pub files_changed: BTreeSet<String>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub num_turns: Option<u32>,
    pub cost_usd: Option<f64>,
    /// The tool flagged its own run as failed
    pub is_error: bool,
    /// Final answer from a `result` event
    pub result_text: Option<String>,
    /// Assistant text blocks, in order
    pub assistant_text: Vec<String>,
    turn_usage: Option<Usage>,
}

impl OutputSummary {
    pub fn parse(stdout: &str) -> Self {
        let mut summary = Self::default();
        for line in stdout.lines() {
            let line = line.trim();
            if !line.starts_with('{') {
                continue;
            }
            match serde_json::from_str::<StreamEvent>(line) {
                Ok(event) => {
                    summary.events += 1;
                    summary.absorb(event);
                }
                Err(e) => debug!(error = %e, "skipping unparsable output line"),
            }
        }
        summary.finish();
        summary
    }

    /// Text to scan for tags: assistant messages followed by the final result.
    pub fn signal_text(&self) -> String {
        let mut parts: Vec<&str> = self.assistant_text.iter().map(String::as_str).collect();
        if let Some(result) = &self.result_text {
            parts.push(result);
        }
        parts.join("\n")
    }

    fn absorb(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Assistant { message } => {
                for block in message.content {
                    match block {
                        ContentBlock::ToolUse { name, input } => {
                            debug!(tool = %describe_tool_use(&name, &input), "agent tool use");
                            if WRITE_TOOLS.contains(&name.as_str()) {
                                let path = input
                                    .get("file_path")
                                    .or_else(|| input.get("notebook_path"))
                                    .and_then(|v| v.as_str());
                                if let Some(path) = path {
                                    self.files_changed.insert(path.to_string());
                                }
                            }
                        }
                        ContentBlock::Text { text } => self.assistant_text.push(text),
                        ContentBlock::Other => {}
                    }
                }
            }
            StreamEvent::Result {
                subtype,
                result,
                is_error,
                num_turns,
                total_cost_usd,
                usage,
            } => {
                debug!(%subtype, is_error, "agent result");
                self.is_error |= is_error;
                if result.is_some() {
                    self.result_text = result;
                }
                self.num_turns = num_turns.or(self.num_turns);
                self.cost_usd = total_cost_usd.or(self.cost_usd);
                if let Some(usage) = usage {
                    // Cumulative totals for the whole session
                    self.tokens_in = Some(usage.input_tokens);
                    self.tokens_out = Some(usage.output_tokens);
                }
            }
            StreamEvent::ItemCompleted { item } => match item.item_type.as_str() {
                "agent_message" => {
                    if let Some(text) = item.text {
                        self.assistant_text.push(text);
                    }
                }
                "file_change" => {
                    for change in item.changes {
                        self.files_changed.insert(change.path);
                    }
                }
                _ => {}
            },
            StreamEvent::TurnCompleted { usage } => {
                if let Some(usage) = usage {
                    let total = self.turn_usage.get_or_insert_with(Usage::default);
                    total.input_tokens += usage.input_tokens;
                    total.output_tokens += usage.output_tokens;
                }
            }
            StreamEvent::System { .. } | StreamEvent::Other => {}
        }
    }

    fn finish(&mut self) {
        // Per-turn usage only counts when no session total was reported.
        if self.tokens_in.is_none() && self.tokens_out.is_none() {
            if let Some(total) = self.turn_usage {
                self.tokens_in = Some(total.input_tokens);
                self.tokens_out = Some(total.output_tokens);
            }
        }
    }
}

/// Extract a human-readable description from a tool use event
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let path = || {
        input
            .get("file_path")
            .and_then(|v| v.as_str())
            .map(shorten_path)
            .unwrap_or_else(|| "file".to_string())
    };
    match name {
        "Read" => format!("Reading: {}", path()),
        "Write" => format!("Creating: {}", path()),
        "Edit" | "MultiEdit" => format!("Editing: {}", path()),
        "Bash" => {
            let cmd = input
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 40))
                .unwrap_or_else(|| "command".to_string());
            format!("Running: {}", cmd)
        }
        "Grep" | "Glob" => {
            let pattern = input
                .get("pattern")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 30))
                .unwrap_or_else(|| "*".to_string());
            format!("Searching: {}", pattern)
        }
        _ => name.to_string(),
    }
}

/// Shorten a file path to just the last 2 components
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

/// Truncate a string with ellipsis, on a char boundary
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAUDE_RUN: &str = r#"{"type":"system","subtype":"init","session_id":"abc"}
{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hmm"},{"type":"tool_use","name":"Read","input":{"file_path":"/repo/src/lib.rs"},"id":"1"}]}}
{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Edit","input":{"file_path":"/repo/src/lib.rs"},"id":"2"},{"type":"tool_use","name":"Write","input":{"file_path":"/repo/src/new.rs"},"id":"3"}]}}
{"type":"user","message":{"content":[]}}
{"type":"assistant","message":{"content":[{"type":"text","text":"Done. <commit>abc1234</commit>"}]}}
{"type":"result","subtype":"success","result":"All set <commit>abc1234</commit>","is_error":false,"num_turns":7,"total_cost_usd":0.42,"usage":{"input_tokens":12450,"output_tokens":3200,"cache_read_input_tokens":99}}
"#;

    #[test]
    fn parse_claude_stream() {
        let summary = OutputSummary::parse(CLAUDE_RUN);
        assert_eq!(summary.events, 6);
        assert!(summary.result_text.is_some());
        assert_eq!(
            summary.files_changed.iter().cloned().collect::<Vec<_>>(),
            vec!["/repo/src/lib.rs", "/repo/src/new.rs"]
        );
        assert_eq!(summary.tokens_in, Some(12450));
        assert_eq!(summary.tokens_out, Some(3200));
        assert_eq!(summary.num_turns, Some(7));
        assert_eq!(summary.cost_usd, Some(0.42));
        assert!(!summary.is_error);
        assert!(summary.signal_text().ends_with("All set <commit>abc1234</commit>"));
    }

    #[test]
    fn parse_codex_stream_sums_turn_usage() {
        let stdout = r#"{"type":"thread.started","thread_id":"t"}
{"type":"item.completed","item":{"id":"i1","type":"file_change","changes":[{"path":"src/a.rs","kind":"update"}]}}
{"type":"turn.completed","usage":{"input_tokens":100,"cached_input_tokens":5,"output_tokens":20}}
{"type":"item.completed","item":{"id":"i2","type":"agent_message","text":"<verdict>PASS</verdict>"}}
{"type":"turn.completed","usage":{"input_tokens":50,"output_tokens":10}}
"#;
        let summary = OutputSummary::parse(stdout);
        assert_eq!(summary.events, 5);
        assert!(summary.result_text.is_none());
        assert!(summary.files_changed.contains("src/a.rs"));
        assert_eq!(summary.tokens_in, Some(150));
        assert_eq!(summary.tokens_out, Some(30));
        assert_eq!(summary.signal_text(), "<verdict>PASS</verdict>");
    }

    #[test]
    fn plain_text_yields_no_events() {
        let summary = OutputSummary::parse("hello\nnot json {\n");
        assert_eq!(summary.events, 0);
        assert_eq!(summary.tokens_in, None);
        assert!(summary.signal_text().is_empty());
    }

    #[test]
    fn result_error_flag_is_kept() {
        let summary = OutputSummary::parse(
            r#"{"type":"result","subtype":"error_max_turns","is_error":true,"num_turns":61}"#,
        );
        assert!(summary.is_error);
        assert_eq!(summary.num_turns, Some(61));
        assert_eq!(summary.result_text, None);
    }

    #[test]
    fn test_describe_tool_use() {
        let input = serde_json::json!({"file_path": "/Users/foo/project/src/main.rs"});
        assert_eq!(describe_tool_use("Read", &input), "Reading: src/main.rs");

        let input = serde_json::json!({"command": "cargo test --release"});
        assert_eq!(
            describe_tool_use("Bash", &input),
            "Running: cargo test --release"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("héllo wörld", 8), "héllo...");
        assert_eq!(truncate_str("short", 8), "short");
    }
}
