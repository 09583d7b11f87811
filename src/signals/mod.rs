//! Result signals emitted by agents.
//!
//! Agents close their answer with XML-style tags the runner can parse
//! regardless of the tool's output format:
//!
//! - `<commit>sha</commit>` - the commit made for this stage
//! - `<rating>8/10</rating>` and `<verdict>PASS</verdict>` - audit outcome
//! - `<audit-report>path</audit-report>` - detailed audit write-up
//! - `<file-changed>path</file-changed>` - files touched, for plain-text tools

mod parser;
mod types;

pub use parser::extract_signals;
pub use types::{AgentSignals, Verdict};
