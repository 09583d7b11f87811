//! Skills: reusable prompt fragments a task can opt into.
//!
//! Skills are stored as markdown files in `.nightshift/skills/`:
//!
//! ```text
//! .nightshift/skills/
//! ├── rust-conventions/
//! │   └── SKILL.md
//! └── release-checklist/
//!     └── SKILL.md
//! ```
//!
//! A task lists the skills it wants in its frontmatter (`skills: [...]`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

/// The name of the skills directory within .nightshift
pub const SKILLS_DIR: &str = "skills";

/// The filename for skill content
pub const SKILL_FILE: &str = "SKILL.md";

#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    /// Directory name
    pub name: String,
    pub content: String,
}

impl Skill {
    /// The skill formatted for injection into a prompt.
    pub fn as_prompt_section(&self) -> String {
        format!(
            "## SKILL: {}\n\n{}",
            self.name.to_uppercase().replace('-', " "),
            self.content.trim()
        )
    }
}

#[derive(Debug, Clone)]
pub struct SkillsLoader {
    skills_dir: PathBuf,
}

impl SkillsLoader {
    pub fn new(nightshift_dir: &Path) -> Self {
        Self {
            skills_dir: nightshift_dir.join(SKILLS_DIR),
        }
    }

    /// Load a single skill by name.
    ///
    /// Missing skills are skipped with a warning; only I/O failures on an
    /// existing skill file are errors.
    pub fn load_skill(&self, name: &str) -> Result<Option<Skill>> {
        let skill_file = self.skills_dir.join(name).join(SKILL_FILE);
        if !skill_file.exists() {
            warn!(skill = name, path = %skill_file.display(), "skill not found");
            return Ok(None);
        }

        let content = std::fs::read_to_string(&skill_file)
            .with_context(|| format!("Failed to read skill file: {}", skill_file.display()))?;
        Ok(Some(Skill {
            name: name.to_string(),
            content,
        }))
    }

    /// Prompt section for the named skills, empty if none exist.
    pub fn skills_section(&self, names: &[String]) -> Result<String> {
        let mut sections = Vec::new();
        for name in names {
            if let Some(skill) = self.load_skill(name)? {
                sections.push(skill.as_prompt_section());
            }
        }
        if sections.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(
            "## SKILLS AND CONVENTIONS\n\n{}",
            sections.join("\n\n---\n\n")
        ))
    }
}
