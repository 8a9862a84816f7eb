//! Phase definition and JSON loading.
//!
//! This module provides:
//! - `Phase`, one named unit of work with dependencies, an optional parallel
//!   group and a timeout
//! - `PhaseCommand`, what a phase actually launches (a shell line or the
//!   configured agent with a prompt)
//! - `PhasesFile`, the `phases.json` format for workflows defined outside
//!   `conductor.toml`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timeout applied when neither the phase nor the configuration sets one.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(1800);

fn default_timeout() -> Duration {
    DEFAULT_PHASE_TIMEOUT
}

/// A single unit of work in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    /// Unique name within the workflow
    pub name: String,
    /// Phases that must have succeeded before this one may start
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Parallel group; members of the same group run concurrently
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Wall-clock limit for one attempt
    #[serde(
        rename = "timeout_secs",
        with = "duration_secs",
        default = "default_timeout"
    )]
    pub timeout: Duration,
    #[serde(flatten)]
    pub command: PhaseCommand,
}

/// What a phase launches.
///
/// With `run` set the line is executed through `sh -c`; otherwise the
/// configured agent is invoked and `prompt` is piped to its stdin.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhaseCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Identity selector handed to the worker (`CONDUCTOR_PROFILE`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Phase {
    /// Create a phase that invokes the configured agent.
    pub fn new(name: &str, depends_on: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            group: None,
            timeout: DEFAULT_PHASE_TIMEOUT,
            command: PhaseCommand::default(),
        }
    }

    /// Create a phase that runs a shell line.
    pub fn shell(name: &str, run: &str) -> Self {
        let mut phase = Self::new(name, &[]);
        phase.command.run = Some(run.to_string());
        phase
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.command.prompt = Some(prompt.to_string());
        self
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.command.profile = Some(profile.to_string());
        self
    }

    /// True when the phase launches the agent rather than a shell line.
    pub fn uses_agent(&self) -> bool {
        self.command.run.is_none()
    }
}

/// Represents the full phases.json file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasesFile {
    /// Optional workflow name the phases were written for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    pub phases: Vec<Phase>,
}

impl PhasesFile {
    /// Load phases from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read phases file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse phases file: {}", path.display()))
    }

    /// Save phases to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize phases file")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write phases file: {}", path.display()))?;
        Ok(())
    }

    pub fn get_phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
