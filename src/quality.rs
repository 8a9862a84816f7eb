//! Quality gate.
//!
//! Extracts a numeric score from free-form reviewer output and decides
//! whether it clears the configured minimum. A missing score is a distinct
//! outcome, never read as zero. Regeneration is bounded by a
//! [`RetryBudget`]; once it runs out the operator chooses between accepting
//! the result anyway and aborting.

use crate::errors::OrchestratorError;
use crate::retry::RetryBudget;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// Highest score the extractor accepts.
pub const MAX_SCORE: f32 = 10.0;

// "Score: 9/10", "**Score**: 8.5 / 10", "overall score - 7 out of 10"
static SCORE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bscore\b[\s:*=\-]*(\d+(?:\.\d+)?)\s*(?:/|out\s+of)\s*10(?:\D|$)").unwrap()
});

/// A score pulled from text; `found` is false when no valid score was present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityScore {
    pub value: f32,
    pub found: bool,
}

impl QualityScore {
    pub fn found(value: f32) -> Self {
        Self { value, found: true }
    }

    pub fn not_found() -> Self {
        Self {
            value: 0.0,
            found: false,
        }
    }

    pub fn value(&self) -> Option<f32> {
        self.found.then_some(self.value)
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(value) => write!(f, "{value}/10"),
            None => f.write_str("no score"),
        }
    }
}

/// Extract the score from reviewer output.
///
/// The first valid score wins. Values above 10 are rejected and do not
/// shadow a later valid score.
pub fn extract_score(text: &str) -> QualityScore {
    SCORE_REGEX
        .captures_iter(text)
        .filter_map(|cap| cap.get(1)?.as_str().parse::<f32>().ok())
        .find(|value| (0.0..=MAX_SCORE).contains(value))
        .map(QualityScore::found)
        .unwrap_or_else(QualityScore::not_found)
}

/// Why a score did not clear the gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shortfall {
    BelowThreshold { score: f32, minimum: f32 },
    NotFound,
}

impl Shortfall {
    pub fn into_error(self, phase: &str) -> OrchestratorError {
        match self {
            Shortfall::BelowThreshold { score, minimum } => {
                OrchestratorError::ScoreBelowThreshold { score, minimum }
            }
            Shortfall::NotFound => OrchestratorError::ScoreNotFound {
                phase: phase.to_string(),
            },
        }
    }
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shortfall::BelowThreshold { score, minimum } => {
                write!(f, "score {score}/10 is below the minimum of {minimum}")
            }
            Shortfall::NotFound => f.write_str("no score found in the output"),
        }
    }
}

/// What the caller must do next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityDecision {
    Accept { score: f32 },
    /// Regenerate the reviewed artifact and score it again
    RegenerateAndRetry { shortfall: Shortfall, attempt: u32, remaining: u32 },
    /// Budget exhausted; the operator must choose a [`QualityOverride`]
    Escalate { shortfall: Shortfall, attempts: u32 },
}

/// Operator choice once regeneration attempts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityOverride {
    AcceptAnyway,
    Abort,
}

/// Context handed to the operator on escalation.
#[derive(Debug, Clone)]
pub struct QualityEscalation {
    pub phase: String,
    pub shortfall: Shortfall,
    pub attempts: u32,
    pub minimum: f32,
    pub log: Option<std::path::PathBuf>,
}

/// Pure decision for one scored attempt.
///
/// `failed_attempts` counts failures including this one when it fails.
pub fn decide(
    score: &QualityScore,
    minimum: f32,
    failed_attempts: u32,
    max_attempts: u32,
) -> QualityDecision {
    let shortfall = match score.value() {
        Some(value) if value >= minimum => return QualityDecision::Accept { score: value },
        Some(value) => Shortfall::BelowThreshold {
            score: value,
            minimum,
        },
        None => Shortfall::NotFound,
    };

    if failed_attempts >= max_attempts {
        QualityDecision::Escalate {
            shortfall,
            attempts: failed_attempts,
        }
    } else {
        QualityDecision::RegenerateAndRetry {
            shortfall,
            attempt: failed_attempts,
            remaining: max_attempts - failed_attempts,
        }
    }
}

/// Stateful gate: remembers failed attempts across calls.
#[derive(Debug, Clone)]
pub struct QualityGate {
    minimum: f32,
    budget: RetryBudget,
}

impl QualityGate {
    pub fn new(minimum: f32, max_attempts: u32) -> Self {
        Self {
            minimum,
            budget: RetryBudget::new(max_attempts),
        }
    }

    pub fn minimum(&self) -> f32 {
        self.minimum
    }

    pub fn failed_attempts(&self) -> u32 {
        self.budget.used()
    }

    /// Judge one score, charging the budget when it falls short.
    pub fn enforce(&mut self, score: &QualityScore) -> QualityDecision {
        if let Some(value) = score.value()
            && value >= self.minimum
        {
            return QualityDecision::Accept { score: value };
        }
        self.budget.consume(1);
        decide(
            score,
            self.minimum,
            self.budget.used(),
            self.budget.max_attempts(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bold_score() {
        let text = "Review complete.\n\n**Score: 9/10**\n";
        assert_eq!(extract_score(text), QualityScore::found(9.0));
    }

    #[test]
    fn test_extract_compact_bold_score_and_absent_score() {
        assert_eq!(extract_score("Score: 9/10"), QualityScore::found(9.0));
        assert_eq!(extract_score("**Score:8/10**"), QualityScore::found(8.0));
        assert_eq!(extract_score("no score here"), QualityScore::not_found());
    }

    #[test]
    fn test_extract_score_variants() {
        assert_eq!(extract_score("score: 7 / 10").value(), Some(7.0));
        assert_eq!(extract_score("**Score**: 8.5/10").value(), Some(8.5));
        assert_eq!(extract_score("Overall score - 6 out of 10").value(), Some(6.0));
        assert_eq!(extract_score("SCORE=10/10").value(), Some(10.0));
    }

    #[test]
    fn test_missing_score_is_not_zero() {
        let score = extract_score("Looks good to me, ship it.");
        assert!(!score.found);
        assert_eq!(score.value(), None);
        assert_eq!(score.to_string(), "no score");
    }

    #[test]
    fn test_out_of_range_scores_are_rejected() {
        assert!(!extract_score("Score: 11/10").found);
        assert!(!extract_score("Score: 9/100").found);
        assert!(!extract_score("subscore: 5/10").found);
    }

    #[test]
    fn test_first_valid_score_wins() {
        let text = "Score: 12/10 (typo)\nOverall score: 7/10.\nSecurity score: 9/10.";
        assert_eq!(extract_score(text).value(), Some(7.0));
    }

    #[test]
    fn test_decide_is_pure() {
        let low = QualityScore::found(6.0);
        assert!(matches!(
            decide(&low, 8.0, 1, 3),
            QualityDecision::RegenerateAndRetry {
                attempt: 1,
                remaining: 2,
                ..
            }
        ));
        assert!(matches!(
            decide(&low, 8.0, 3, 3),
            QualityDecision::Escalate { attempts: 3, .. }
        ));
        assert_eq!(
            decide(&QualityScore::found(8.0), 8.0, 0, 3),
            QualityDecision::Accept { score: 8.0 }
        );
    }

    #[test]
    fn test_gate_regenerates_then_escalates() {
        let mut gate = QualityGate::new(8.0, 3);
        let low = QualityScore::found(6.0);

        match gate.enforce(&low) {
            QualityDecision::RegenerateAndRetry { shortfall, .. } => assert_eq!(
                shortfall,
                Shortfall::BelowThreshold {
                    score: 6.0,
                    minimum: 8.0
                }
            ),
            other => panic!("expected regeneration, got {other:?}"),
        }
        assert!(matches!(
            gate.enforce(&low),
            QualityDecision::RegenerateAndRetry { .. }
        ));
        assert!(matches!(
            gate.enforce(&low),
            QualityDecision::Escalate { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_gate_not_found_is_distinct_shortfall() {
        let mut gate = QualityGate::new(8.0, 2);
        assert!(matches!(
            gate.enforce(&QualityScore::not_found()),
            QualityDecision::RegenerateAndRetry {
                shortfall: Shortfall::NotFound,
                ..
            }
        ));
        assert_eq!(gate.failed_attempts(), 1);
    }

    #[test]
    fn test_gate_accept_does_not_charge_budget() {
        let mut gate = QualityGate::new(8.0, 3);
        assert_eq!(
            gate.enforce(&QualityScore::found(9.0)),
            QualityDecision::Accept { score: 9.0 }
        );
        assert_eq!(gate.failed_attempts(), 0);
    }

    #[test]
    fn test_shortfall_maps_to_typed_errors() {
        let below = Shortfall::BelowThreshold {
            score: 5.0,
            minimum: 8.0,
        }
        .into_error("review");
        assert!(matches!(below, OrchestratorError::ScoreBelowThreshold { .. }));
        let missing = Shortfall::NotFound.into_error("review");
        assert!(matches!(missing, OrchestratorError::ScoreNotFound { .. }));
    }
}
