//! `nightshift init`: create the `.nightshift/` workspace in a project.
//!
//! ```text
//! .nightshift/
//! ├── config.toml      # Runner settings and agent profiles
//! ├── tasks/           # Task documents (markdown + frontmatter)
//! ├── context/         # Prompt context layers
//! ├── skills/          # Reusable prompt fragments
//! └── logs/            # Run reports and diagnostics
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE, NIGHTSHIFT_DIR, NightShiftToml};

const SUBDIRS: [&str; 4] = ["tasks", "context", "skills", "logs"];

/// Result of initializing a workspace.
#[derive(Debug)]
pub struct InitResult {
    pub nightshift_dir: PathBuf,
    /// Whether `.nightshift/` was newly created
    pub created: bool,
    /// Whether `config.toml` was (re)written
    pub config_written: bool,
}

/// Create or complete the workspace under `project_dir`.
///
/// Existing files are left alone; `force` rewrites `config.toml` with the
/// built-in defaults.
pub fn init_workspace(project_dir: &Path, force: bool) -> Result<InitResult> {
    let nightshift_dir = project_dir.join(NIGHTSHIFT_DIR);
    let created = !nightshift_dir.exists();

    for sub in SUBDIRS {
        let dir = nightshift_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_path = nightshift_dir.join(CONFIG_FILE);
    let config_written = force || !config_path.exists();
    if config_written {
        NightShiftToml::default().save(&config_path)?;
    }

    Ok(InitResult {
        nightshift_dir,
        created,
        config_written,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(NIGHTSHIFT_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_workspace_layout() {
        let dir = tempdir().unwrap();
        let result = init_workspace(dir.path(), false).unwrap();

        assert!(result.created);
        assert!(result.config_written);
        assert_eq!(result.nightshift_dir, dir.path().join(".nightshift"));
        for sub in SUBDIRS {
            assert!(result.nightshift_dir.join(sub).is_dir(), "missing {}", sub);
        }
        let config = NightShiftToml::load(&result.nightshift_dir.join(CONFIG_FILE)).unwrap();
        assert_eq!(config, NightShiftToml::default());
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn second_init_keeps_existing_config() {
        let dir = tempdir().unwrap();
        init_workspace(dir.path(), false).unwrap();
        let config_path = dir.path().join(".nightshift").join(CONFIG_FILE);
        std::fs::write(&config_path, "[runner]\nmax_attempts = 4\n").unwrap();

        let result = init_workspace(dir.path(), false).unwrap();
        assert!(!result.created);
        assert!(!result.config_written);
        assert!(std::fs::read_to_string(&config_path).unwrap().contains("max_attempts = 4"));
    }

    #[test]
    fn force_rewrites_config() {
        let dir = tempdir().unwrap();
        init_workspace(dir.path(), false).unwrap();
        let config_path = dir.path().join(".nightshift").join(CONFIG_FILE);
        std::fs::write(&config_path, "[runner]\nmax_attempts = 4\n").unwrap();

        let result = init_workspace(dir.path(), true).unwrap();
        assert!(result.config_written);
        let config = NightShiftToml::load(&config_path).unwrap();
        assert_eq!(config.runner.max_attempts, 10);
    }

    #[test]
    fn not_initialized_without_directory() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
    }
}
