//! One workflow run, end to end.
//!
//! Wires the components in dependency order: the graph is validated, the
//! runner executes it, the validation cascade checks the result, and the
//! quality gate scores the configured review phase. Every stage reads its
//! inputs from the audit log and the worker logs; the report at the end is
//! rebuilt from the audit log alone.

use crate::audit::{AuditEntry, AuditLog, PhaseStatus, events};
use crate::config::{Config, RunPaths};
use crate::errors::OrchestratorError;
use crate::executor::{ExecutorConfig, ProcessExecutor};
use crate::graph::{GraphBuilder, PhaseGraph};
use crate::operator::Operator;
use crate::phase::Phase;
use crate::quality::{
    QualityDecision, QualityEscalation, QualityGate, QualityOverride, Shortfall, extract_score,
};
use crate::report::WorkflowReport;
use crate::runner::{PhaseRunner, RunOutcome, RunResult, RunnerConfig};
use crate::ui::RunProgress;
use crate::validation::{ValidationController, ValidationLevel, ValidationOutcome, ValidationReport};
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip phases whose most recent record is `succeeded`
    pub resume: bool,
    /// Run only these phases; empty runs all
    pub only: Vec<String>,
    pub skip_validation: bool,
    pub skip_quality: bool,
    pub show_progress: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualitySettings {
    /// Phase whose output carries the score
    pub phase: String,
    /// Phases re-run before the scored phase on regeneration
    pub regenerate: Vec<String>,
    pub minimum: f32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum QualityOutcome {
    Accepted { score: f32 },
    AcceptedAnyway { shortfall: Shortfall },
    Aborted { shortfall: Shortfall },
}

/// Where a run stopped short.
#[derive(Debug, Clone, PartialEq)]
pub enum Stopped {
    Run { at: String, reason: String },
    Validation { level: String, attempts: u32 },
    Quality { phase: String, shortfall: Shortfall },
}

#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub run: RunResult,
    pub validation: Option<ValidationReport>,
    pub quality: Option<QualityOutcome>,
    pub stopped: Option<Stopped>,
    pub report: WorkflowReport,
}

impl WorkflowOutcome {
    pub fn succeeded(&self) -> bool {
        self.stopped.is_none()
    }

    /// The typed error for a run that stopped short.
    pub fn into_error(&self) -> Option<OrchestratorError> {
        Some(match self.stopped.as_ref()? {
            Stopped::Run { at, .. } => OrchestratorError::Aborted { at: at.clone() },
            Stopped::Validation { level, attempts } => OrchestratorError::Exhausted {
                level: level.clone(),
                attempts: *attempts,
            },
            Stopped::Quality { phase, shortfall } => shortfall.into_error(phase),
        })
    }

    fn summary(&self) -> String {
        match &self.stopped {
            Some(Stopped::Run { at, reason }) => format!("aborted at {at}: {reason}"),
            Some(Stopped::Validation { level, attempts }) => {
                format!("aborted: validation level {level} exhausted after {attempts} attempts")
            }
            Some(Stopped::Quality { phase, shortfall }) => {
                format!("aborted: quality gate for {phase}: {shortfall}")
            }
            None => {
                let mut summary = match self.run.outcome {
                    RunOutcome::CompletedWithSkips => "completed with skips".to_string(),
                    _ => "completed".to_string(),
                };
                if let Some(ValidationOutcome::AcceptedPartial { level }) =
                    self.validation.as_ref().map(|v| &v.outcome)
                {
                    summary.push_str(&format!(", validation accepted partial at {level}"));
                }
                if let Some(QualityOutcome::AcceptedAnyway { shortfall }) = &self.quality {
                    summary.push_str(&format!(", quality accepted anyway ({shortfall})"));
                }
                summary
            }
        }
    }
}

pub struct Workflow {
    name: String,
    phases: Vec<Phase>,
    paths: RunPaths,
    executor: Arc<ProcessExecutor>,
    runner_config: RunnerConfig,
    levels: Vec<ValidationLevel>,
    validation: ValidationController,
    quality: Option<QualitySettings>,
}

impl Workflow {
    pub fn new(name: &str, phases: Vec<Phase>, paths: RunPaths, executor: ExecutorConfig) -> Self {
        let audit = Arc::new(AuditLog::new(paths.audit_file.clone()));
        let executor = Arc::new(ProcessExecutor::new(executor, audit));
        Self {
            name: name.to_string(),
            phases,
            paths,
            validation: ValidationController::new(Arc::clone(&executor), 0),
            executor,
            runner_config: RunnerConfig::default(),
            levels: Vec::new(),
            quality: None,
        }
    }

    /// Assemble a workflow from `conductor.toml` and the project layout.
    pub fn from_config(config: &Config, name: &str) -> Result<Self> {
        let paths = config.run_paths(name)?;
        let toml = &config.toml;
        let phases = toml.resolve_phases(&config.phases_file)?;
        if phases.is_empty() {
            bail!(
                "No phases defined: add [[phase]] tables to {} or create {}",
                config.config_file.display(),
                config.phases_file.display()
            );
        }

        let executor = ExecutorConfig {
            workflow: name.to_string(),
            log_dir: paths.log_dir.clone(),
            working_dir: config.project_dir.clone(),
            grace_period: toml.grace_period(),
            agent: toml.agent_invocation(),
        };
        let mut workflow = Self::new(name, phases, paths, executor)
            .with_runner_config(toml.runner_config());

        let validation = ValidationController::new(
            Arc::clone(&workflow.executor),
            toml.validation.global_max_attempts,
        )
        .with_classifier(toml.classifier()?)
        .with_remedies(toml.remedies())
        .with_backoff(toml.validation_backoff());
        workflow.levels = toml.validation_levels();
        workflow.validation = validation;

        if toml.quality.enabled {
            let phase = toml
                .quality
                .phase
                .clone()
                .context("[quality] is enabled but no phase is set")?;
            workflow.quality = Some(QualitySettings {
                phase,
                regenerate: toml.quality.regenerate.clone(),
                minimum: toml.quality.minimum,
                max_attempts: toml.quality.max_attempts,
            });
        }
        Ok(workflow)
    }

    pub fn with_runner_config(mut self, config: RunnerConfig) -> Self {
        self.runner_config = config;
        self
    }

    pub fn with_validation(mut self, levels: Vec<ValidationLevel>, global_max_attempts: u32) -> Self {
        self.levels = levels;
        self.validation = ValidationController::new(Arc::clone(&self.executor), global_max_attempts);
        self
    }

    pub fn with_quality(mut self, settings: QualitySettings) -> Self {
        self.quality = Some(settings);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn audit(&self) -> &AuditLog {
        self.executor.audit()
    }

    /// Report over every declared phase, from the audit log.
    pub fn report(&self) -> Result<WorkflowReport> {
        let names: Vec<&str> = self.phases.iter().map(|p| p.name.as_str()).collect();
        let entries = self.audit().entries()?;
        Ok(WorkflowReport::from_entries(&self.name, &names, &entries))
    }

    pub async fn run(
        &self,
        options: &RunOptions,
        operator: &mut dyn Operator,
    ) -> Result<WorkflowOutcome> {
        std::fs::create_dir_all(&self.paths.log_dir).with_context(|| {
            format!("Failed to create run directory {}", self.paths.log_dir.display())
        })?;

        let graph = self.build_graph(&options.only)?;
        let already_succeeded = if options.resume {
            self.audit().succeeded_phases()?
        } else {
            HashSet::new()
        };

        let progress = Arc::new(if options.show_progress {
            RunProgress::new(graph.len() as u64)
        } else {
            RunProgress::hidden()
        });
        let runner = PhaseRunner::new(
            Arc::clone(&self.executor),
            Arc::clone(&progress),
            self.runner_config,
        );

        info!(workflow = %self.name, run_id = %self.audit().run_id(), "workflow started");
        let run = runner.run_from(&graph, &already_succeeded, operator).await?;
        progress.finish();

        let mut outcome = WorkflowOutcome {
            stopped: match &run.outcome {
                RunOutcome::Aborted { at, reason } => Some(Stopped::Run {
                    at: at.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            },
            run,
            validation: None,
            quality: None,
            report: WorkflowReport::from_entries::<&str>(&self.name, &[], &[]),
        };

        if outcome.stopped.is_none() && !options.skip_validation && !self.levels.is_empty() {
            let report = self.validation.run(&self.levels, operator).await?;
            if let ValidationOutcome::Aborted { level } = &report.outcome {
                let attempts = report
                    .level(level)
                    .map(|l| l.attempts.len() as u32)
                    .unwrap_or(0);
                outcome.stopped = Some(Stopped::Validation {
                    level: level.clone(),
                    attempts,
                });
            }
            outcome.validation = Some(report);
        }

        if outcome.stopped.is_none()
            && !options.skip_quality
            && let Some(settings) = &self.quality
        {
            match self
                .enforce_quality(settings, options.show_progress, operator)
                .await?
            {
                Ok(quality) => {
                    if let QualityOutcome::Aborted { shortfall } = &quality {
                        outcome.stopped = Some(Stopped::Quality {
                            phase: settings.phase.clone(),
                            shortfall: *shortfall,
                        });
                    }
                    outcome.quality = Some(quality);
                }
                Err(stopped) => outcome.stopped = Some(stopped),
            }
        }

        let summary = outcome.summary();
        self.audit()
            .append(AuditEntry::event(&self.name, events::RUN_FINISHED, summary.as_str()))?;
        info!(workflow = %self.name, outcome = %summary, "workflow finished");

        outcome.report = self.report()?;
        outcome.report.write_json(&self.paths.report_file)?;
        Ok(outcome)
    }

    fn build_graph(&self, only: &[String]) -> Result<PhaseGraph> {
        if only.is_empty() {
            return Ok(GraphBuilder::new(self.phases.clone()).build()?);
        }
        self.subgraph(only).context("Invalid --only selection")
    }

    /// Graph of the named phases; every other declared phase is external and
    /// gated through the audit log.
    fn subgraph(&self, names: &[String]) -> Result<PhaseGraph> {
        let known: HashSet<&str> = self.phases.iter().map(|p| p.name.as_str()).collect();
        if let Some(unknown) = names.iter().find(|name| !known.contains(name.as_str())) {
            bail!("Unknown phase '{}'", unknown);
        }
        let (selected, rest): (Vec<Phase>, Vec<Phase>) = self
            .phases
            .iter()
            .cloned()
            .partition(|p| names.contains(&p.name));
        Ok(GraphBuilder::new(selected)
            .allow_external(rest.into_iter().map(|p| p.name))
            .build()?)
    }

    fn phase(&self, name: &str) -> Result<&Phase> {
        self.phases
            .iter()
            .find(|p| p.name == name)
            .with_context(|| format!("Quality phase '{}' is not a declared phase", name))
    }

    /// Re-run phases through the dependency-gated runner.
    ///
    /// Blocked and failed reruns reach the operator exactly as they do in the
    /// main pass.
    async fn rerun(
        &self,
        names: &[String],
        show_progress: bool,
        operator: &mut dyn Operator,
    ) -> Result<RunResult> {
        let graph = self.subgraph(names)?;
        let progress = Arc::new(if show_progress {
            RunProgress::new(graph.len() as u64)
        } else {
            RunProgress::hidden()
        });
        let runner = PhaseRunner::new(
            Arc::clone(&self.executor),
            Arc::clone(&progress),
            self.runner_config,
        );
        let result = runner.run(&graph, operator).await?;
        progress.finish();
        Ok(result)
    }

    /// Log of the scored phase's most recent attempt, if that attempt succeeded.
    fn succeeded_log(&self, phase: &str) -> Result<Option<PathBuf>> {
        Ok(match self.audit().most_recent(phase)? {
            Some(entry) if entry.status == Some(PhaseStatus::Succeeded) => entry.log,
            _ => None,
        })
    }

    /// Score the review phase, regenerating while the budget lasts.
    ///
    /// `Err(Stopped)` when the operator aborted a blocked or failed rerun.
    /// Output of an attempt that did not succeed is never scored.
    async fn enforce_quality(
        &self,
        settings: &QualitySettings,
        show_progress: bool,
        operator: &mut dyn Operator,
    ) -> Result<Result<QualityOutcome, Stopped>> {
        let scored = self.phase(&settings.phase)?;
        let mut gate = QualityGate::new(settings.minimum, settings.max_attempts);

        let Some(mut log) = self.succeeded_log(&scored.name)? else {
            warn!(phase = %scored.name, "scored phase has not succeeded, nothing to score");
            let outcome = self.escalate(settings, Shortfall::NotFound, 0, None, operator)?;
            return Ok(Ok(outcome));
        };

        loop {
            let output = std::fs::read(&log)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            let score = extract_score(&output);
            self.audit().append(
                AuditEntry::event(&scored.name, events::QUALITY_SCORE, score.to_string())
                    .with_log(&log),
            )?;

            match gate.enforce(&score) {
                QualityDecision::Accept { score } => {
                    self.record_quality(&scored.name, "accept")?;
                    info!(phase = %scored.name, score, "quality gate passed");
                    return Ok(Ok(QualityOutcome::Accepted { score }));
                }
                QualityDecision::RegenerateAndRetry {
                    shortfall,
                    attempt,
                    remaining,
                } => {
                    self.record_quality(&scored.name, "regenerate")?;
                    info!(
                        phase = %scored.name,
                        %shortfall,
                        attempt,
                        remaining,
                        "quality below threshold, regenerating"
                    );

                    if !settings.regenerate.is_empty() {
                        let regenerated =
                            self.rerun(&settings.regenerate, show_progress, operator).await?;
                        if let RunOutcome::Aborted { at, reason } = regenerated.outcome {
                            return Ok(Err(Stopped::Run { at, reason }));
                        }
                    }

                    let rescored = self
                        .rerun(std::slice::from_ref(&scored.name), show_progress, operator)
                        .await?;
                    if let RunOutcome::Aborted { at, reason } = rescored.outcome {
                        return Ok(Err(Stopped::Run { at, reason }));
                    }
                    match rescored
                        .records
                        .iter()
                        .rev()
                        .find(|r| r.phase == scored.name && r.succeeded())
                    {
                        Some(record) => log = record.log_path.clone(),
                        None => {
                            // blocked or left failed by the operator
                            let outcome = self.escalate(
                                settings,
                                Shortfall::NotFound,
                                gate.failed_attempts(),
                                None,
                                operator,
                            )?;
                            return Ok(Ok(outcome));
                        }
                    }
                }
                QualityDecision::Escalate {
                    shortfall,
                    attempts,
                } => {
                    let outcome =
                        self.escalate(settings, shortfall, attempts, Some(log), operator)?;
                    return Ok(Ok(outcome));
                }
            }
        }
    }

    fn escalate(
        &self,
        settings: &QualitySettings,
        shortfall: Shortfall,
        attempts: u32,
        log: Option<PathBuf>,
        operator: &mut dyn Operator,
    ) -> Result<QualityOutcome> {
        let escalation = QualityEscalation {
            phase: settings.phase.clone(),
            shortfall,
            attempts,
            minimum: settings.minimum,
            log,
        };
        Ok(match operator.on_quality_shortfall(&escalation) {
            QualityOverride::AcceptAnyway => {
                self.record_quality(&settings.phase, "accept_anyway")?;
                QualityOutcome::AcceptedAnyway { shortfall }
            }
            QualityOverride::Abort => {
                self.record_quality(&settings.phase, "abort")?;
                QualityOutcome::Aborted { shortfall }
            }
        })
    }

    fn record_quality(&self, phase: &str, decision: &str) -> Result<()> {
        self.audit()
            .append(AuditEntry::event(phase, events::QUALITY_DECISION, decision))?;
        Ok(())
    }
}
