//! `conductor.toml` configuration.
//!
//! Reads `.conductor/conductor.toml`. Layered as file → environment → CLI:
//! the file provides defaults, `CONDUCTOR_AGENT_CMD` overrides the agent
//! command, and CLI flags are applied by the caller.
//!
//! # Configuration File Format
//!
//! ```toml
//! [agent]
//! command = "claude"
//! profile = "default"
//! args = ["--print"]
//!
//! [defaults]
//! timeout_secs = 1800
//! grace_period_secs = 5
//! max_phase_retries = 2
//! timeout_backoff = 2.0
//! on_failure = "abort"
//! on_blocked = "abort"
//!
//! [phases.overrides."review-*"]
//! timeout_secs = 600
//!
//! [[phase]]
//! name = "plan"
//! prompt = "Write the plan"
//!
//! [[phase]]
//! name = "impl-api"
//! depends_on = ["plan"]
//! group = "implement"
//! run = "make api"
//!
//! [validation]
//! global_max_attempts = 9
//!
//! [[validation.level]]
//! name = "style"
//! run = "cargo fmt --check"
//!
//! [[validation.remedy]]
//! class = "import_error"
//! run = "pip install -r requirements.txt"
//!
//! [[validation.signature]]
//! class = "lint"
//! pattern = "(?i)clippy::"
//!
//! [quality]
//! enabled = true
//! phase = "review"
//! minimum = 8.0
//! max_attempts = 3
//! ```

use crate::executor::AgentInvocation;
use crate::operator::{OnBlocked, OnExhausted, OnFailure, OnShortfall, OperatorPolicies};
use crate::phase::{Phase, PhaseCommand, PhasesFile};
use crate::retry::Backoff;
use crate::runner::RunnerConfig;
use crate::validation::{ErrorClassifier, Remedies, ValidationLevel};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Written by `conductor init`.
pub const STARTER_CONFIG: &str = r#"# Conductor workflow configuration

[agent]
# command = "claude"        # or set CONDUCTOR_AGENT_CMD
profile = "default"
args = ["--print"]

[defaults]
timeout_secs = 1800
grace_period_secs = 5
max_phase_retries = 2
timeout_backoff = 2.0
on_failure = "abort"
on_blocked = "abort"

[[phase]]
name = "plan"
prompt = "Write an implementation plan to PLAN.md"

[[phase]]
name = "build"
depends_on = ["plan"]
run = "echo build"

[validation]
global_max_attempts = 9
on_exhausted = "abort"

[[validation.level]]
name = "check"
run = "echo check"
max_attempts = 3

[quality]
enabled = false
minimum = 8.0
max_attempts = 3
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSection {
    /// Agent binary (default: "claude")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: None,
            profile: default_profile(),
            args: default_agent_args(),
        }
    }
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["--print".to_string()]
}

/// Settings applied to every phase unless overridden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Time between SIGTERM and SIGKILL
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_max_phase_retries")]
    pub max_phase_retries: u32,
    /// Multiplier for "retry with increased timeout"
    #[serde(default = "default_timeout_backoff")]
    pub timeout_backoff: f64,
    #[serde(default)]
    pub on_failure: OnFailure,
    #[serde(default)]
    pub on_blocked: OnBlocked,
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            grace_period_secs: default_grace_period_secs(),
            max_phase_retries: default_max_phase_retries(),
            timeout_backoff: default_timeout_backoff(),
            on_failure: OnFailure::default(),
            on_blocked: OnBlocked::default(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_max_phase_retries() -> u32 {
    2
}

fn default_timeout_backoff() -> f64 {
    2.0
}

/// Per-pattern overrides, keyed by glob pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasesSection {
    #[serde(default)]
    pub overrides: BTreeMap<String, PhaseOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// A `[[phase]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub command: PhaseCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub name: String,
    pub run: String,
    #[serde(default = "default_level_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_level_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_level_attempts() -> u32 {
    3
}

fn default_level_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemedySpec {
    pub class: String,
    pub run: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureSpec {
    pub class: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSection {
    /// Attempts shared by all levels
    #[serde(default = "default_global_attempts")]
    pub global_max_attempts: u32,
    /// Fixed delay between attempts of one level
    #[serde(default)]
    pub backoff_secs: u64,
    #[serde(default)]
    pub on_exhausted: OnExhausted,
    #[serde(default, rename = "level", skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<LevelSpec>,
    #[serde(default, rename = "remedy", skip_serializing_if = "Vec::is_empty")]
    pub remedies: Vec<RemedySpec>,
    #[serde(default, rename = "signature", skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<SignatureSpec>,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            global_max_attempts: default_global_attempts(),
            backoff_secs: 0,
            on_exhausted: OnExhausted::default(),
            levels: Vec::new(),
            remedies: Vec::new(),
            signatures: Vec::new(),
        }
    }
}

fn default_global_attempts() -> u32 {
    9
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySection {
    #[serde(default)]
    pub enabled: bool,
    /// Phase whose output carries the score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Phases re-run before the scored phase on regeneration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regenerate: Vec<String>,
    #[serde(default = "default_minimum")]
    pub minimum: f32,
    #[serde(default = "default_quality_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub on_shortfall: OnShortfall,
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            enabled: false,
            phase: None,
            regenerate: Vec::new(),
            minimum: default_minimum(),
            max_attempts: default_quality_attempts(),
            on_shortfall: OnShortfall::default(),
        }
    }
}

fn default_minimum() -> f32 {
    8.0
}

fn default_quality_attempts() -> u32 {
    3
}

/// The complete conductor.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub phases: PhasesSection,
    #[serde(default, rename = "phase", skip_serializing_if = "Vec::is_empty")]
    pub phase_specs: Vec<PhaseSpec>,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub quality: QualitySection,
}

impl ConductorToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `conductor.toml` from the state directory, or defaults when absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join("conductor.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Agent command, with fallback to the environment.
    pub fn agent_command(&self) -> String {
        self.agent
            .command
            .clone()
            .or_else(|| std::env::var("CONDUCTOR_AGENT_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    pub fn agent_invocation(&self) -> AgentInvocation {
        AgentInvocation {
            program: self.agent_command(),
            args: self.agent.args.clone(),
            profile: self.agent.profile.clone(),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.defaults.grace_period_secs)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            max_phase_retries: self.defaults.max_phase_retries,
            timeout_backoff: self.defaults.timeout_backoff,
        }
    }

    pub fn policies(&self) -> OperatorPolicies {
        OperatorPolicies {
            on_failure: self.defaults.on_failure,
            on_blocked: self.defaults.on_blocked,
            on_exhausted: self.validation.on_exhausted,
            on_shortfall: self.quality.on_shortfall,
        }
    }

    /// The workflow's phases with defaults and overrides applied.
    ///
    /// `[[phase]]` tables win; without them `phases_file` is read when present.
    pub fn resolve_phases(&self, phases_file: &Path) -> Result<Vec<Phase>> {
        let mut phases: Vec<Phase> = if !self.phase_specs.is_empty() {
            self.phase_specs.iter().map(|spec| self.to_phase(spec)).collect()
        } else if phases_file.exists() {
            let mut phases = PhasesFile::load(phases_file)?.phases;
            for phase in &mut phases {
                self.apply_overrides(phase);
            }
            phases
        } else {
            Vec::new()
        };

        for phase in &mut phases {
            if phase.command.profile.is_none() {
                phase.command.profile = Some(self.agent.profile.clone());
            }
        }
        Ok(phases)
    }

    fn to_phase(&self, spec: &PhaseSpec) -> Phase {
        let mut phase = Phase {
            name: spec.name.clone(),
            depends_on: spec.depends_on.clone(),
            group: spec.group.clone(),
            timeout: Duration::from_secs(self.defaults.timeout_secs),
            command: spec.command.clone(),
        };
        self.apply_overrides(&mut phase);
        if let Some(secs) = spec.timeout_secs {
            phase.timeout = Duration::from_secs(secs);
        }
        phase
    }

    /// Apply every matching override in sorted pattern order.
    fn apply_overrides(&self, phase: &mut Phase) {
        for (pattern, override_cfg) in &self.phases.overrides {
            let Ok(pattern) = glob::Pattern::new(pattern) else {
                continue;
            };
            if !pattern.matches(&phase.name) {
                continue;
            }
            if let Some(secs) = override_cfg.timeout_secs {
                phase.timeout = Duration::from_secs(secs);
            }
            if let Some(profile) = &override_cfg.profile
                && phase.command.profile.is_none()
            {
                phase.command.profile = Some(profile.clone());
            }
        }
    }

    pub fn validation_levels(&self) -> Vec<ValidationLevel> {
        self.validation
            .levels
            .iter()
            .map(|level| {
                ValidationLevel::new(&level.name, &level.run)
                    .with_max_attempts(level.max_attempts)
                    .with_timeout(Duration::from_secs(level.timeout_secs))
            })
            .collect()
    }

    pub fn validation_backoff(&self) -> Backoff {
        match self.validation.backoff_secs {
            0 => Backoff::None,
            secs => Backoff::Fixed(Duration::from_secs(secs)),
        }
    }

    /// Built-in signatures plus the configured ones.
    pub fn classifier(&self) -> Result<ErrorClassifier> {
        let mut classifier = ErrorClassifier::default();
        for signature in &self.validation.signatures {
            classifier
                .add_signature(signature.class.as_str().into(), &signature.pattern)
                .with_context(|| {
                    format!(
                        "Invalid pattern for error signature '{}': {}",
                        signature.class, signature.pattern
                    )
                })?;
        }
        Ok(classifier)
    }

    pub fn remedies(&self) -> Remedies {
        let mut remedies = Remedies::default();
        for remedy in &self.validation.remedies {
            remedies.insert(remedy.class.as_str().into(), &remedy.run);
        }
        remedies
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let mut names = HashSet::new();
        for spec in &self.phase_specs {
            if !names.insert(spec.name.as_str()) {
                warnings.push(format!("Duplicate phase '{}'", spec.name));
            }
        }
        for spec in &self.phase_specs {
            for dep in &spec.depends_on {
                if !names.contains(dep.as_str()) {
                    warnings.push(format!(
                        "Phase '{}' depends on unknown phase '{}'",
                        spec.name, dep
                    ));
                }
            }
            if spec.command.run.is_none() && spec.command.prompt.is_none() {
                warnings.push(format!(
                    "Phase '{}' has neither a run line nor a prompt",
                    spec.name
                ));
            }
        }

        for pattern in self.phases.overrides.keys() {
            if let Err(e) = glob::Pattern::new(pattern) {
                warnings.push(format!("Invalid override pattern '{}': {}", pattern, e));
            }
        }

        if self.defaults.timeout_backoff <= 1.0 {
            warnings.push(format!(
                "timeout_backoff {} does not increase the timeout; use a value above 1.0",
                self.defaults.timeout_backoff
            ));
        }

        for level in &self.validation.levels {
            if level.max_attempts == 0 {
                warnings.push(format!(
                    "Validation level '{}' has max_attempts = 0 and will never run",
                    level.name
                ));
            }
        }
        for signature in &self.validation.signatures {
            if let Err(e) = regex::Regex::new(&signature.pattern) {
                warnings.push(format!(
                    "Invalid pattern for error signature '{}': {}",
                    signature.class, e
                ));
            }
        }

        if self.quality.enabled {
            match &self.quality.phase {
                None => warnings.push("Quality gate is enabled but no phase is set".to_string()),
                Some(phase) if !self.phase_specs.is_empty() && !names.contains(phase.as_str()) => {
                    warnings.push(format!("Quality phase '{}' is not a declared phase", phase))
                }
                Some(_) => {}
            }
            for phase in &self.quality.regenerate {
                if !self.phase_specs.is_empty() && !names.contains(phase.as_str()) {
                    warnings.push(format!(
                        "Quality regenerate phase '{}' is not a declared phase",
                        phase
                    ));
                }
            }
        }

        warnings
    }
}
