//! Prompt assembly from layered context files.
//!
//! ```text
//! .nightshift/context/
//! ├── global.md
//! ├── agents/<agent>.md
//! ├── projects/<project>.md
//! ├── phases/<phase>.md
//! ├── stages/<stage>.md
//! └── <custom>.md          # named by the task's `contexts`
//! ```
//!
//! Layers are concatenated in that order, followed by the task's skills, the
//! task itself and the output contract for its stage. Missing files are
//! skipped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::errors::AttemptError;
use crate::skills::SkillsLoader;
use crate::task::{Stage, Task};

pub const CONTEXT_DIR: &str = "context";

const SECTION_BREAK: &str = "\n\n---\n\n";

/// Builds the full prompt for a task at its current stage.
#[async_trait]
pub trait PromptAssembler: Send + Sync {
    async fn build_prompt(&self, task: &Task) -> Result<String, AttemptError>;
}

/// [`PromptAssembler`] reading `.nightshift/context` and `.nightshift/skills`.
#[derive(Debug, Clone)]
pub struct ContextPromptAssembler {
    context_dir: PathBuf,
    skills: SkillsLoader,
}

impl ContextPromptAssembler {
    pub fn new(nightshift_dir: &Path) -> Self {
        Self {
            context_dir: nightshift_dir.join(CONTEXT_DIR),
            skills: SkillsLoader::new(nightshift_dir),
        }
    }

    fn read_layer(&self, relative: &str) -> Result<Option<String>> {
        let path = self.context_dir.join(relative);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read context file: {}", path.display()))?;
        let trimmed = content.trim();
        Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
    }

    /// Synchronous assembly; the trait impl runs this off the async runtime.
    pub fn assemble(&self, task: &Task) -> Result<String> {
        let mut layers: Vec<String> = vec!["global.md".to_string()];
        if let Some(agent) = task.agent.as_deref().or(task.provider.as_deref()) {
            layers.push(format!("agents/{}.md", agent));
        }
        if let Some(project) = &task.project {
            layers.push(format!("projects/{}.md", project));
        }
        if let Some(phase) = &task.phase {
            layers.push(format!("phases/{}.md", phase));
        }
        layers.push(format!("stages/{}.md", task.stage));
        layers.extend(task.contexts.iter().map(|c| format!("{}.md", c)));

        let mut sections = Vec::new();
        for layer in &layers {
            if let Some(content) = self.read_layer(layer)? {
                sections.push(content);
            }
        }

        let skills = self.skills.skills_section(&task.skills)?;
        if !skills.is_empty() {
            sections.push(skills);
        }

        sections.push(task_section(task));
        sections.push(output_contract(task.stage));

        Ok(sections.join(SECTION_BREAK))
    }
}

#[async_trait]
impl PromptAssembler for ContextPromptAssembler {
    async fn build_prompt(&self, task: &Task) -> Result<String, AttemptError> {
        let assembler = self.clone();
        let task = task.clone();
        tokio::task::spawn_blocking(move || assembler.assemble(&task))
            .await
            .map_err(|e| AttemptError::Prompt(e.to_string()))?
            .map_err(|e| AttemptError::Prompt(format!("{:#}", e)))
    }
}

fn task_section(task: &Task) -> String {
    let mut out = format!(
        "## TASK: {}\n\n- id: {}\n- stage: {}\n",
        task.display_title(),
        task.id,
        task.stage
    );
    if task.attempts > 0 {
        out.push_str(&format!("- previous attempts: {}\n", task.attempts));
    }
    if let Some(parent) = &task.parent {
        out.push_str(&format!("- parent task: {}\n", parent));
    }
    if !task.tags.is_empty() {
        out.push_str(&format!("- tags: {}\n", task.tags.join(", ")));
    }
    let body = task.content.trim();
    if !body.is_empty() {
        out.push('\n');
        out.push_str(body);
        out.push('\n');
    }
    out
}

fn output_contract(stage: Stage) -> String {
    let mut out = String::from(
        "## OUTPUT CONTRACT\n\nEnd your final message with these tags:\n\
         - `<commit>SHA</commit>` for the commit you made, if any\n\
         - `<file-changed>path</file-changed>` once per file you modified\n",
    );
    if stage == Stage::Audit {
        out.push_str(
            "- `<rating>N/10</rating>` your quality rating of the work\n\
             - `<verdict>PASS</verdict>` to accept, or `<verdict>NEEDS_WORK</verdict>` to send it back to code\n\
             - `<audit-report>path</audit-report>` if you wrote a detailed report\n",
        );
    }
    out
}
