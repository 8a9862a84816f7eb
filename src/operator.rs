//! Operator decision points.
//!
//! The engine never silently aborts: every terminal failure is handed to an
//! [`Operator`] together with what failed, its status or class, where its
//! log lives, and which choices exist. Three operators are provided:
//! - [`InteractiveOperator`] prompts on the terminal via `dialoguer`
//! - [`NonInteractiveOperator`] applies the configured defaults (`--yes`)
//! - [`QueuedOperator`] replays pre-recorded decisions, for embedding and tests

use crate::quality::{QualityEscalation, QualityOverride};
use crate::report::{describe_blocked, describe_exhausted, describe_phase_failure, describe_quality};
use crate::runner::{BlockedDecision, BlockedPhase, FailureDecision, PhaseFailure};
use crate::validation::{ExhaustedDecision, LevelExhausted};
use console::Term;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

pub trait Operator: Send {
    fn on_phase_failure(&mut self, failure: &PhaseFailure) -> FailureDecision;
    fn on_blocked(&mut self, blocked: &BlockedPhase) -> BlockedDecision;
    fn on_validation_exhausted(&mut self, exhausted: &LevelExhausted) -> ExhaustedDecision;
    fn on_quality_shortfall(&mut self, escalation: &QualityEscalation) -> QualityOverride;
}

/// Non-interactive reaction to a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    #[default]
    Abort,
    Skip,
    /// Retry while the phase retry budget lasts, then abort
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnBlocked {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExhausted {
    #[default]
    Abort,
    AcceptPartial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnShortfall {
    #[default]
    Abort,
    AcceptAnyway,
}

/// Defaults applied when nobody is at the terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperatorPolicies {
    pub on_failure: OnFailure,
    pub on_blocked: OnBlocked,
    pub on_exhausted: OnExhausted,
    pub on_shortfall: OnShortfall,
}

pub struct NonInteractiveOperator {
    policies: OperatorPolicies,
    term: Term,
}

impl NonInteractiveOperator {
    pub fn new(policies: OperatorPolicies) -> Self {
        Self {
            policies,
            term: Term::stderr(),
        }
    }

    fn announce(&self, description: &str, decision: &str) {
        let _ = self.term.write_line(description);
        let _ = self
            .term
            .write_line(&format!("  {} {}", console::style("Auto-decision:").dim(), decision));
    }
}

impl Operator for NonInteractiveOperator {
    fn on_phase_failure(&mut self, failure: &PhaseFailure) -> FailureDecision {
        let decision = match self.policies.on_failure {
            OnFailure::Retry if failure.retries_remaining > 0 => FailureDecision::Retry,
            OnFailure::Retry | OnFailure::Abort => FailureDecision::Abort,
            OnFailure::Skip => FailureDecision::Skip,
        };
        warn!(step = %failure.step, ?decision, "step failed");
        self.announce(&describe_phase_failure(failure), &format!("{decision:?}"));
        decision
    }

    fn on_blocked(&mut self, blocked: &BlockedPhase) -> BlockedDecision {
        let decision = match self.policies.on_blocked {
            OnBlocked::Abort => BlockedDecision::Abort,
            OnBlocked::Skip => BlockedDecision::Skip,
        };
        warn!(step = %blocked.step, dependency = %blocked.dependency, ?decision, "step blocked");
        self.announce(&describe_blocked(blocked), &format!("{decision:?}"));
        decision
    }

    fn on_validation_exhausted(&mut self, exhausted: &LevelExhausted) -> ExhaustedDecision {
        let decision = match self.policies.on_exhausted {
            OnExhausted::Abort => ExhaustedDecision::Abort,
            OnExhausted::AcceptPartial => ExhaustedDecision::AcceptPartial,
        };
        self.announce(&describe_exhausted(exhausted), &format!("{decision:?}"));
        decision
    }

    fn on_quality_shortfall(&mut self, escalation: &QualityEscalation) -> QualityOverride {
        let decision = match self.policies.on_shortfall {
            OnShortfall::Abort => QualityOverride::Abort,
            OnShortfall::AcceptAnyway => QualityOverride::AcceptAnyway,
        };
        self.announce(&describe_quality(escalation), &format!("{decision:?}"));
        decision
    }
}

/// Prompts the operator on the terminal.
///
/// A prompt that cannot be shown (no TTY, closed stdin) is treated as abort.
pub struct InteractiveOperator {
    theme: ColorfulTheme,
}

impl Default for InteractiveOperator {
    fn default() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl InteractiveOperator {
    fn choose<T: Copy>(&self, description: &str, prompt: &str, options: &[(&str, T)], abort: T) -> T {
        println!("\n{description}");
        let labels: Vec<&str> = options.iter().map(|(label, _)| *label).collect();
        match Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(&labels)
            .default(0)
            .interact()
        {
            Ok(index) => options[index].1,
            Err(e) => {
                warn!(error = %e, "operator prompt unavailable, aborting");
                abort
            }
        }
    }
}

impl Operator for InteractiveOperator {
    fn on_phase_failure(&mut self, failure: &PhaseFailure) -> FailureDecision {
        let mut options = Vec::new();
        if failure.retries_remaining > 0 {
            options.push(("Retry the failed phases", FailureDecision::Retry));
            options.push((
                "Retry with an increased timeout",
                FailureDecision::RetryWithLongerTimeout,
            ));
        }
        options.push(("Skip and continue", FailureDecision::Skip));
        options.push(("Abort the workflow", FailureDecision::Abort));

        self.choose(
            &describe_phase_failure(failure),
            "How should the workflow proceed?",
            &options,
            FailureDecision::Abort,
        )
    }

    fn on_blocked(&mut self, blocked: &BlockedPhase) -> BlockedDecision {
        self.choose(
            &describe_blocked(blocked),
            "The step cannot run. Skip it or abort?",
            &[
                ("Skip and continue", BlockedDecision::Skip),
                ("Abort the workflow", BlockedDecision::Abort),
            ],
            BlockedDecision::Abort,
        )
    }

    fn on_validation_exhausted(&mut self, exhausted: &LevelExhausted) -> ExhaustedDecision {
        let mut options = vec![("Accept the partial result", ExhaustedDecision::AcceptPartial)];
        if exhausted.can_pause {
            options.push((
                "Pause, fix manually, then re-run this level",
                ExhaustedDecision::PauseForManual,
            ));
        }
        options.push(("Abort the workflow", ExhaustedDecision::Abort));

        let decision = self.choose(
            &describe_exhausted(exhausted),
            "Validation attempts are exhausted",
            &options,
            ExhaustedDecision::Abort,
        );

        if decision == ExhaustedDecision::PauseForManual {
            let resume = Confirm::with_theme(&self.theme)
                .with_prompt("Fix applied? Re-run the level now")
                .default(true)
                .interact()
                .unwrap_or(false);
            if !resume {
                return ExhaustedDecision::Abort;
            }
        }
        decision
    }

    fn on_quality_shortfall(&mut self, escalation: &QualityEscalation) -> QualityOverride {
        self.choose(
            &describe_quality(escalation),
            "Quality attempts are exhausted",
            &[
                ("Accept the result anyway", QualityOverride::AcceptAnyway),
                ("Abort the workflow", QualityOverride::Abort),
            ],
            QualityOverride::Abort,
        )
    }
}

/// Replays queued decisions; an empty queue answers abort.
#[derive(Debug, Default)]
pub struct QueuedOperator {
    failures: VecDeque<FailureDecision>,
    blocked: VecDeque<BlockedDecision>,
    exhausted: VecDeque<ExhaustedDecision>,
    quality: VecDeque<QualityOverride>,
    /// Descriptions shown so far, in order
    pub transcript: Vec<String>,
}

impl QueuedOperator {
    pub fn with_failures(mut self, decisions: Vec<FailureDecision>) -> Self {
        self.failures.extend(decisions);
        self
    }

    pub fn with_blocked(mut self, decisions: Vec<BlockedDecision>) -> Self {
        self.blocked.extend(decisions);
        self
    }

    pub fn with_exhausted(mut self, decisions: Vec<ExhaustedDecision>) -> Self {
        self.exhausted.extend(decisions);
        self
    }

    pub fn with_quality(mut self, decisions: Vec<QualityOverride>) -> Self {
        self.quality.extend(decisions);
        self
    }
}

impl Operator for QueuedOperator {
    fn on_phase_failure(&mut self, failure: &PhaseFailure) -> FailureDecision {
        self.transcript.push(describe_phase_failure(failure));
        self.failures.pop_front().unwrap_or(FailureDecision::Abort)
    }

    fn on_blocked(&mut self, blocked: &BlockedPhase) -> BlockedDecision {
        self.transcript.push(describe_blocked(blocked));
        self.blocked.pop_front().unwrap_or(BlockedDecision::Abort)
    }

    fn on_validation_exhausted(&mut self, exhausted: &LevelExhausted) -> ExhaustedDecision {
        self.transcript.push(describe_exhausted(exhausted));
        self.exhausted.pop_front().unwrap_or(ExhaustedDecision::Abort)
    }

    fn on_quality_shortfall(&mut self, escalation: &QualityEscalation) -> QualityOverride {
        self.transcript.push(describe_quality(escalation));
        self.quality.pop_front().unwrap_or(QualityOverride::Abort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{ExecutionRecord, PhaseStatus};
    use crate::quality::Shortfall;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::Duration;

    fn failure(retries_remaining: u32) -> PhaseFailure {
        let now = Utc::now();
        PhaseFailure {
            step: "build".into(),
            group: None,
            failed: vec![ExecutionRecord {
                phase: "build".into(),
                status: PhaseStatus::Failed,
                exit_code: Some(2),
                duration: Duration::from_secs(1),
                started_at: now,
                finished_at: now,
                attempt: 1,
                group: None,
                log_path: PathBuf::from("logs/build-1.log"),
                error: None,
            }],
            retries_used: 0,
            retries_remaining,
        }
    }

    #[test]
    fn test_non_interactive_retry_respects_budget() {
        let mut op = NonInteractiveOperator::new(OperatorPolicies {
            on_failure: OnFailure::Retry,
            ..Default::default()
        });
        assert_eq!(op.on_phase_failure(&failure(1)), FailureDecision::Retry);
        assert_eq!(op.on_phase_failure(&failure(0)), FailureDecision::Abort);
    }

    #[test]
    fn test_non_interactive_defaults_abort() {
        let mut op = NonInteractiveOperator::new(OperatorPolicies::default());
        assert_eq!(op.on_phase_failure(&failure(2)), FailureDecision::Abort);
        let escalation = QualityEscalation {
            phase: "review".into(),
            shortfall: Shortfall::NotFound,
            attempts: 3,
            minimum: 8.0,
            log: None,
        };
        assert_eq!(op.on_quality_shortfall(&escalation), QualityOverride::Abort);
    }

    #[test]
    fn test_policies_deserialize_snake_case() {
        let on_exhausted: OnExhausted = serde_json::from_str("\"accept_partial\"").unwrap();
        assert_eq!(on_exhausted, OnExhausted::AcceptPartial);
        let on_shortfall: OnShortfall = serde_json::from_str("\"accept_anyway\"").unwrap();
        assert_eq!(on_shortfall, OnShortfall::AcceptAnyway);
    }

    #[test]
    fn test_queued_operator_replays_then_aborts() {
        let mut op = QueuedOperator::default().with_failures(vec![FailureDecision::Skip]);
        assert_eq!(op.on_phase_failure(&failure(1)), FailureDecision::Skip);
        assert_eq!(op.on_phase_failure(&failure(1)), FailureDecision::Abort);
        assert_eq!(op.transcript.len(), 2);
        assert!(op.transcript[0].contains("logs/build-1.log"));
    }
}
