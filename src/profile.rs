//! Agent profiles: how to invoke one coding-agent CLI.
//!
//! Profiles are declared under `[agents.<name>]` in `.nightshift/config.toml`
//! and resolved per stage, so an agent can use a different model or tighter
//! limits for `audit` than for `code`:
//!
//! ```toml
//! [agents.claude]
//! cli = "claude"
//! model = "sonnet"
//! output_flags = ["--output-format", "stream-json", "--verbose"]
//!
//! [agents.claude.stages.audit]
//! model = "opus"
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::AttemptError;
use crate::task::Stage;

/// How the assembled prompt reaches the agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    /// `<prompt_flag> <prompt>` appended to the arguments (default)
    #[default]
    Flag,
    /// Written to the child's standard input, which is then closed
    Stdin,
    /// Trailing positional argument
    Positional,
}

impl std::fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromptStyle::Flag => write!(f, "flag"),
            PromptStyle::Stdin => write!(f, "stdin"),
            PromptStyle::Positional => write!(f, "positional"),
        }
    }
}

impl std::str::FromStr for PromptStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flag" => Ok(PromptStyle::Flag),
            "stdin" => Ok(PromptStyle::Stdin),
            "positional" => Ok(PromptStyle::Positional),
            _ => anyhow::bail!(
                "Invalid prompt style '{}'. Valid values: flag, stdin, positional",
                s
            ),
        }
    }
}

/// Per-attempt safety limits. Unset limits are not enforced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl SafetyLimits {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// Limits from `other` win where set.
    pub fn overlay(&self, other: &SafetyLimits) -> SafetyLimits {
        SafetyLimits {
            max_turns: other.max_turns.or(self.max_turns),
            max_budget_usd: other.max_budget_usd.or(self.max_budget_usd),
            timeout_seconds: other.timeout_seconds.or(self.timeout_seconds),
        }
    }
}

/// Stage-specific tweaks to an agent profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Appended after the profile's unattended flags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_flags: Vec<String>,
    #[serde(default)]
    pub safety: SafetyLimits,
}

/// On-disk shape of an `[agents.<name>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub cli: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcommand: Option<String>,
    #[serde(default = "default_model_flag")]
    pub model_flag: String,
    #[serde(default)]
    pub unattended_flags: Vec<String>,
    #[serde(default)]
    pub output_flags: Vec<String>,
    #[serde(default)]
    pub prompt_style: PromptStyle,
    #[serde(default = "default_prompt_flag")]
    pub prompt_flag: String,
    #[serde(default)]
    pub safety: SafetyLimits,
    /// Keyed by stage name (`plan`, `code`, `audit`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stages: BTreeMap<String, StageOverride>,
}

fn default_model_flag() -> String {
    "--model".to_string()
}

fn default_prompt_flag() -> String {
    "-p".to_string()
}

impl AgentConfig {
    /// Claude Code in print mode with stream-JSON output.
    pub fn claude() -> Self {
        Self {
            cli: "claude".to_string(),
            model: Some("sonnet".to_string()),
            subcommand: None,
            model_flag: default_model_flag(),
            unattended_flags: vec!["--dangerously-skip-permissions".to_string()],
            output_flags: vec![
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
            ],
            prompt_style: PromptStyle::Flag,
            prompt_flag: default_prompt_flag(),
            safety: SafetyLimits {
                max_turns: Some(60),
                max_budget_usd: Some(5.0),
                timeout_seconds: Some(3600),
            },
            stages: BTreeMap::new(),
        }
    }

    /// Codex in non-interactive `exec` mode with JSON events.
    pub fn codex() -> Self {
        Self {
            cli: "codex".to_string(),
            model: None,
            subcommand: Some("exec".to_string()),
            model_flag: default_model_flag(),
            unattended_flags: vec!["--full-auto".to_string()],
            output_flags: vec!["--json".to_string()],
            prompt_style: PromptStyle::Positional,
            prompt_flag: default_prompt_flag(),
            safety: SafetyLimits {
                max_turns: None,
                max_budget_usd: None,
                timeout_seconds: Some(3600),
            },
            stages: BTreeMap::new(),
        }
    }

    /// Materialize the profile for `stage`, applying any stage override.
    pub fn to_profile(&self, name: &str, stage: Stage) -> AgentProfile {
        let stage_override = self.stages.get(stage.as_str());
        let mut unattended_flags = self.unattended_flags.clone();
        let mut model = self.model.clone();
        let mut safety = self.safety.clone();
        if let Some(o) = stage_override {
            unattended_flags.extend(o.extra_flags.iter().cloned());
            if o.model.is_some() {
                model = o.model.clone();
            }
            safety = safety.overlay(&o.safety);
        }

        AgentProfile {
            name: name.to_string(),
            cli: self.cli.clone(),
            model,
            subcommand: self.subcommand.clone(),
            model_flag: self.model_flag.clone(),
            unattended_flags,
            output_flags: self.output_flags.clone(),
            prompt_style: self.prompt_style,
            prompt_flag: self.prompt_flag.clone(),
            safety,
        }
    }
}

/// A fully resolved, read-only invocation for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    pub cli: String,
    pub model: Option<String>,
    pub subcommand: Option<String>,
    pub model_flag: String,
    pub unattended_flags: Vec<String>,
    pub output_flags: Vec<String>,
    pub prompt_style: PromptStyle,
    pub prompt_flag: String,
    pub safety: SafetyLimits,
}

impl AgentProfile {
    /// Whether the tool was asked for machine-readable output.
    pub fn structured_output(&self) -> bool {
        !self.output_flags.is_empty()
    }

    pub fn validate(&self) -> Result<(), AttemptError> {
        let invalid = |message: &str| AttemptError::InvalidProfile {
            name: self.name.clone(),
            message: message.to_string(),
        };
        if self.cli.trim().is_empty() {
            return Err(invalid("cli must not be empty"));
        }
        if self.prompt_style == PromptStyle::Flag && self.prompt_flag.trim().is_empty() {
            return Err(invalid("prompt_flag is required for prompt_style = \"flag\""));
        }
        if self.safety.timeout_seconds == Some(0) {
            return Err(invalid("timeout_seconds must be greater than zero"));
        }
        Ok(())
    }
}

/// Resolves a profile name to an [`AgentProfile`] for a stage.
pub trait ProfileResolver: Send + Sync {
    fn resolve(&self, name: &str, stage: Stage) -> Result<AgentProfile, AttemptError>;
}

/// [`ProfileResolver`] backed by the `[agents]` tables of the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigProfileResolver {
    agents: BTreeMap<String, AgentConfig>,
}

impl ConfigProfileResolver {
    pub fn new(agents: BTreeMap<String, AgentConfig>) -> Self {
        Self { agents }
    }
}

impl ProfileResolver for ConfigProfileResolver {
    fn resolve(&self, name: &str, stage: Stage) -> Result<AgentProfile, AttemptError> {
        let config = self
            .agents
            .get(name)
            .ok_or_else(|| AttemptError::ProfileNotFound {
                name: name.to_string(),
                stage,
            })?;
        let profile = config.to_profile(name, stage);
        profile.validate()?;
        Ok(profile)
    }
}
