//! Workspace initialization.

use anyhow::Result;
use std::path::Path;

pub fn cmd_init(project_dir: &Path, force: bool) -> Result<()> {
    use nightshift::init::init_workspace;

    let result = init_workspace(project_dir, force)?;

    if result.created {
        println!(
            "Initialized night shift workspace at {}",
            result.nightshift_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .nightshift/");
        println!("  ├── config.toml   # Runner settings and agent profiles");
        println!("  ├── tasks/        # Task documents (markdown + frontmatter)");
        println!("  ├── context/      # Prompt context layers");
        println!("  ├── skills/       # Reusable prompt fragments");
        println!("  └── logs/         # Run reports");
        println!();
        println!("Next steps:");
        println!("  1. Add a task under .nightshift/tasks/ with `stage: plan`");
        println!("  2. Run `nightshift column plan` to work through it");
    } else if result.config_written {
        println!(
            "Rewrote default config at {}",
            result.nightshift_dir.join(nightshift::config::CONFIG_FILE).display()
        );
    } else {
        println!(
            "Night shift workspace already initialized at {}",
            result.nightshift_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}
