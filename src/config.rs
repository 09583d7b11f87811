//! Night-shift configuration, read from `.nightshift/config.toml`.
//!
//! Values are layered file → environment → CLI:
//!
//! ```toml
//! [runner]
//! max_attempts = 10
//! max_reworks = 2
//! default_agent = "claude"
//! save_transcripts = true
//!
//! [agents.claude]
//! cli = "claude"
//! model = "sonnet"
//! unattended_flags = ["--dangerously-skip-permissions"]
//! output_flags = ["--output-format", "stream-json", "--verbose"]
//!
//! [agents.claude.safety]
//! max_turns = 60
//! max_budget_usd = 5.0
//! timeout_seconds = 3600
//! ```
//!
//! Environment overrides: `NIGHTSHIFT_MAX_ATTEMPTS`, `NIGHTSHIFT_DEFAULT_AGENT`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::profile::{AgentConfig, ConfigProfileResolver};

pub const NIGHTSHIFT_DIR: &str = ".nightshift";
pub const CONFIG_FILE: &str = "config.toml";

pub const ENV_MAX_ATTEMPTS: &str = "NIGHTSHIFT_MAX_ATTEMPTS";
pub const ENV_DEFAULT_AGENT: &str = "NIGHTSHIFT_DEFAULT_AGENT";

/// `[runner]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSection {
    /// Ceiling on a task's attempts counter; a failed attempt past it is terminal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Audit → code loops allowed per task within one run
    #[serde(default = "default_max_reworks")]
    pub max_reworks: u32,
    /// Profile used when a task names neither agent nor provider
    #[serde(default = "default_agent")]
    pub default_agent: String,
    /// Keep raw agent output next to the run report
    #[serde(default = "default_save_transcripts")]
    pub save_transcripts: bool,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_max_reworks() -> u32 {
    2
}

fn default_agent() -> String {
    "claude".to_string()
}

fn default_save_transcripts() -> bool {
    true
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_reworks: default_max_reworks(),
            default_agent: default_agent(),
            save_transcripts: default_save_transcripts(),
        }
    }
}

fn default_agents() -> BTreeMap<String, AgentConfig> {
    let mut agents = BTreeMap::new();
    agents.insert("claude".to_string(), AgentConfig::claude());
    agents.insert("codex".to_string(), AgentConfig::codex());
    agents
}

/// Root of `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightShiftToml {
    #[serde(default)]
    pub runner: RunnerSection,
    /// Declaring any `[agents.*]` table replaces the built-in profiles
    #[serde(default = "default_agents")]
    pub agents: BTreeMap<String, AgentConfig>,
}

impl Default for NightShiftToml {
    fn default() -> Self {
        Self {
            runner: RunnerSection::default(),
            agents: default_agents(),
        }
    }
}

impl NightShiftToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    pub fn load_or_default(nightshift_dir: &Path) -> Result<Self> {
        let config_path = nightshift_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            self.runner.max_attempts = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number, got '{}'", ENV_MAX_ATTEMPTS, raw))?;
        }
        if let Some(agent) = lookup(ENV_DEFAULT_AGENT).filter(|a| !a.trim().is_empty()) {
            self.runner.default_agent = agent.trim().to_string();
        }
        Ok(())
    }

    /// Every problem found, empty when the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.runner.max_attempts == 0 {
            errors.push("runner.max_attempts must be at least 1".to_string());
        }
        if self.runner.default_agent.trim().is_empty() {
            errors.push("runner.default_agent must not be empty".to_string());
        } else if !self.agents.contains_key(&self.runner.default_agent) {
            errors.push(format!(
                "runner.default_agent '{}' has no [agents.{}] table",
                self.runner.default_agent, self.runner.default_agent
            ));
        }

        for (name, agent) in &self.agents {
            if agent.cli.trim().is_empty() {
                errors.push(format!("agents.{}.cli must not be empty", name));
            }
            if agent.safety.timeout_seconds == Some(0) {
                errors.push(format!("agents.{}.safety.timeout_seconds must be > 0", name));
            }
            for (stage, stage_override) in &agent.stages {
                if stage.parse::<crate::task::Stage>().is_err() {
                    errors.push(format!("agents.{}.stages.{}: unknown stage", name, stage));
                }
                if stage_override.safety.timeout_seconds == Some(0) {
                    errors.push(format!(
                        "agents.{}.stages.{}.safety.timeout_seconds must be > 0",
                        name, stage
                    ));
                }
            }
        }

        errors
    }
}

/// Resolved configuration for one project directory.
#[derive(Debug, Clone)]
pub struct NightShiftConfig {
    pub project_dir: PathBuf,
    pub nightshift_dir: PathBuf,
    pub toml: NightShiftToml,
}

impl NightShiftConfig {
    /// Load file and environment layers for `project_dir`.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        Self::with_cli_args(project_dir, None)
    }

    /// Load all layers, with CLI flags taking precedence.
    pub fn with_cli_args(project_dir: PathBuf, max_attempts: Option<u32>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let nightshift_dir = project_dir.join(NIGHTSHIFT_DIR);
        let mut toml = NightShiftToml::load_or_default(&nightshift_dir)?;
        toml.apply_env(|key| std::env::var(key).ok())?;
        if let Some(max) = max_attempts {
            toml.runner.max_attempts = max;
        }

        let errors = toml.validate();
        if !errors.is_empty() {
            anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
        }

        Ok(Self {
            project_dir,
            nightshift_dir,
            toml,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.nightshift_dir.is_dir()
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.nightshift_dir.join("tasks")
    }

    pub fn runner(&self) -> &RunnerSection {
        &self.toml.runner
    }

    pub fn profile_resolver(&self) -> ConfigProfileResolver {
        ConfigProfileResolver::new(self.toml.agents.clone())
    }
}
