//! Signal parsing from agent output.
//!
//! Extracts result tags from text using regex patterns for:
//! - `<commit>sha</commit>`
//! - `<rating>N</rating>` or `<rating>N/10</rating>`
//! - `<verdict>WORD</verdict>`
//! - `<audit-report>path</audit-report>`
//! - `<file-changed>path</file-changed>`

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::types::AgentSignals;

// Compile regexes once using LazyLock
static COMMIT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<commit>\s*([0-9A-Za-z._/-]+)\s*</commit>").unwrap());

static RATING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<rating>\s*(\d{1,3})(?:\.\d+)?\s*(?:/\s*10)?\s*</rating>").unwrap()
});

static VERDICT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<verdict>\s*(.*?)\s*</verdict>").unwrap());

static AUDIT_REPORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<audit-report>\s*(.*?)\s*</audit-report>").unwrap());

static FILE_CHANGED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<file-changed>\s*(.*?)\s*</file-changed>").unwrap());

fn last_capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .last()
}

/// Extract all result tags from the given text.
pub fn extract_signals(text: &str) -> AgentSignals {
    let mut signals = AgentSignals::new();

    signals.commit = last_capture(&COMMIT_REGEX, text);
    signals.rating = last_capture(&RATING_REGEX, text)
        .and_then(|raw| raw.parse::<u16>().ok())
        .map(|n| n.min(10) as u8);
    signals.verdict = last_capture(&VERDICT_REGEX, text);
    signals.audit_report = last_capture(&AUDIT_REPORT_REGEX, text);

    for cap in FILE_CHANGED_REGEX.captures_iter(text) {
        if let Some(path) = cap.get(1) {
            let path = path.as_str().trim();
            if !path.is_empty() && !signals.files_changed.iter().any(|p| p == path) {
                signals.files_changed.push(path.to_string());
            }
        }
    }

    if signals.has_signals() {
        debug!(
            commit = ?signals.commit,
            rating = ?signals.rating,
            verdict = ?signals.verdict,
            files = signals.files_changed.len(),
            "parsed agent signals"
        );
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commit() {
        let signals = extract_signals("Committed. <commit> 4f2a9c1 </commit>");
        assert_eq!(signals.commit.as_deref(), Some("4f2a9c1"));
    }

    #[test]
    fn test_parse_rating_forms() {
        assert_eq!(extract_signals("<rating>8</rating>").rating, Some(8));
        assert_eq!(extract_signals("<rating>7/10</rating>").rating, Some(7));
        assert_eq!(extract_signals("<rating> 6 / 10 </rating>").rating, Some(6));
        assert_eq!(extract_signals("<rating>8.5</rating>").rating, Some(8));
        assert_eq!(extract_signals("<rating>42</rating>").rating, Some(10));
        assert_eq!(extract_signals("<rating>great</rating>").rating, None);
    }

    #[test]
    fn test_last_verdict_wins() {
        let text = "Draft: <verdict>PASS</verdict>\nOn reflection: <verdict>NEEDS_WORK</verdict>";
        let signals = extract_signals(text);
        assert_eq!(signals.verdict.as_deref(), Some("NEEDS_WORK"));
    }

    #[test]
    fn test_parse_audit_report_path() {
        let signals = extract_signals("<audit-report>docs/audits/t-1.md</audit-report>");
        assert_eq!(signals.audit_report.as_deref(), Some("docs/audits/t-1.md"));
    }

    #[test]
    fn test_file_changed_deduplicated_in_order() {
        let text = "<file-changed>b.rs</file-changed><file-changed>a.rs</file-changed><file-changed>b.rs</file-changed>";
        let signals = extract_signals(text);
        assert_eq!(signals.files_changed, vec!["b.rs", "a.rs"]);
    }

    #[test]
    fn test_empty_tags_ignored() {
        let signals = extract_signals("<commit></commit><verdict>  </verdict>");
        assert!(!signals.has_signals());
    }

    #[test]
    fn test_no_signals() {
        let signals = extract_signals("Just regular output with no tags.");
        assert_eq!(signals, AgentSignals::default());
    }
}
