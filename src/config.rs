use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::conductor_config::ConductorToml;
use crate::workflow_name;

/// Runtime configuration.
///
/// Resolves the project's `.conductor/` layout and carries the parsed
/// `conductor.toml` together with CLI overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    /// `.conductor/`
    pub state_dir: PathBuf,
    pub config_file: PathBuf,
    pub phases_file: PathBuf,
    /// One directory per workflow: `.conductor/runs/<workflow>/`
    pub runs_dir: PathBuf,
    /// Conductor's own tracing output
    pub log_dir: PathBuf,
    pub verbose: bool,
    /// Never prompt; use the configured non-interactive policies
    pub yes: bool,
    pub toml: ConductorToml,
}

/// Files belonging to one workflow's runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub run_dir: PathBuf,
    pub audit_file: PathBuf,
    /// Per-attempt worker output
    pub log_dir: PathBuf,
    pub report_file: PathBuf,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, yes: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = project_dir.join(".conductor");
        let toml = ConductorToml::load_or_default(&state_dir)?;

        Ok(Self {
            config_file: state_dir.join("conductor.toml"),
            phases_file: state_dir.join("phases.json"),
            runs_dir: state_dir.join("runs"),
            log_dir: state_dir.join("logs"),
            state_dir,
            project_dir,
            verbose,
            yes,
            toml,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.state_dir.is_dir()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.runs_dir).context("Failed to create runs directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Paths for a workflow; the name is validated before any path is built.
    pub fn run_paths(&self, workflow: &str) -> Result<RunPaths> {
        let workflow = workflow_name::validate(workflow)?;
        let run_dir = self.runs_dir.join(workflow);
        Ok(RunPaths {
            audit_file: run_dir.join("audit.jsonl"),
            log_dir: run_dir.join("logs"),
            report_file: run_dir.join("report.json"),
            run_dir,
        })
    }
}
