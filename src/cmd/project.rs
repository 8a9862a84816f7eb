//! Project initialization: `conductor init`.

use anyhow::{Context, Result};
use std::path::Path;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use conductor::conductor_config::STARTER_CONFIG;
    use conductor::config::Config;
    use conductor::ui::icons::FOLDER;

    let state_dir = project_dir.join(".conductor");
    let was_initialized = state_dir.is_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let config = Config::new(project_dir.to_path_buf(), false, false)?;
    config.ensure_directories()?;

    let wrote_config = if config.config_file.exists() {
        false
    } else {
        std::fs::write(&config.config_file, STARTER_CONFIG).with_context(|| {
            format!("Failed to write {}", config.config_file.display())
        })?;
        true
    };

    if was_initialized {
        println!(
            "Conductor project already initialized at {}",
            config.state_dir.display()
        );
        println!("Directory structure verified.");
        return Ok(());
    }

    println!(
        "Initialized conductor project at {}",
        config.state_dir.display()
    );
    println!();
    println!("{}Created directory structure:", FOLDER);
    println!("  .conductor/");
    if wrote_config {
        println!("  ├── conductor.toml  # Phases, validation levels, quality gate");
    }
    println!("  ├── runs/           # Audit log, worker logs and report per workflow");
    println!("  └── logs/           # Conductor's own diagnostic log");
    println!();
    println!("Next steps:");
    println!("  1. Describe your phases in .conductor/conductor.toml");
    println!("  2. Run `conductor config validate`");
    println!("  3. Run `conductor run <workflow>`");

    Ok(())
}
