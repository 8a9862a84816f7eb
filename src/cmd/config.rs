//! Configuration view and validation: `conductor config`.

use anyhow::{Context, Result};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use conductor::config::Config;

    let config = Config::new(project_dir.to_path_buf(), false, true)?;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Conductor Configuration");
            println!("=======================");
            println!();

            if config.config_file.exists() {
                println!("Config file: {}", config.config_file.display());
            } else {
                println!("No conductor.toml found at {}", config.config_file.display());
                println!("Using default configuration.");
            }
            println!();

            let rendered =
                toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            println!("Effective values (with env overrides):");
            println!("  agent command = \"{}\"", config.toml.agent_command());
            match config.toml.resolve_phases(&config.phases_file) {
                Ok(phases) => println!("  phases = {}", phases.len()),
                Err(e) => println!("  phases = unreadable ({:#})", e),
            }
            println!("  validation levels = {}", config.toml.validation.levels.len());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config.config_file.exists() {
                println!("No conductor.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
                println!();
            } else {
                println!("Configuration problems:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
                println!();
                anyhow::bail!("{} configuration problem(s) found", warnings.len());
            }
        }
    }

    Ok(())
}
