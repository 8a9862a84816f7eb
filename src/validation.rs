//! Validation cascade with classified retries.
//!
//! Levels run in order; a level only starts once every earlier level has
//! passed. A failing check is classified by error signature, a registered
//! remedy for that class is run, and the check is retried within both the
//! level's own limit and a global attempt budget. When a level runs out of
//! attempts the operator decides whether to accept the partial result,
//! pause for a manual fix, or abort. Every check and remedy runs through the
//! process executor, so each attempt is in the audit log.

use crate::audit::{AuditEntry, ExecutionRecord, PhaseStatus, events};
use crate::errors::PhaseError;
use crate::executor::{LaunchRequest, ProcessExecutor};
use crate::operator::Operator;
use crate::phase::Phase;
use crate::retry::{Backoff, RetryBudget, RetryPolicy, RetryResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

static IMPORT_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(ImportError|ModuleNotFoundError|No module named|Cannot find module|unresolved import|error\[E0432\])",
    )
    .unwrap()
});

static TYPE_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(TypeError|mismatched types|type mismatch|error\[E0308\]|error TS2\d{3})")
        .unwrap()
});

static SYNTAX_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(SyntaxError|unexpected token|parse error|expected one of)").unwrap()
});

/// One rung of the validation cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationLevel {
    pub name: String,
    /// Shell line; exit code 0 means the level passes
    pub run: String,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl ValidationLevel {
    pub fn new(name: &str, run: &str) -> Self {
        Self {
            name: name.to_string(),
            run: run.to_string(),
            max_attempts: 3,
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name under which the check appears in the audit log.
    pub fn phase_name(&self) -> String {
        format!("validate:{}", self.name)
    }

    fn as_phase(&self) -> Phase {
        Phase::shell(&self.phase_name(), &self.run).with_timeout(self.timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelState {
    Pending,
    Running,
    Passed,
    Failed,
    Exhausted,
}

impl LevelState {
    pub fn can_transition_to(self, next: LevelState) -> bool {
        use LevelState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Exhausted)
                | (Running, Passed)
                | (Running, Failed)
                | (Failed, Running)
                | (Failed, Exhausted)
                | (Exhausted, Running)
        )
    }
}

/// Shared level state, advanced from inside attempt futures.
struct LevelTracker(Mutex<LevelState>);

impl LevelTracker {
    fn new() -> Self {
        Self(Mutex::new(LevelState::Pending))
    }

    fn get(&self) -> LevelState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, next: LevelState) {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == next {
            return;
        }
        debug_assert!(
            state.can_transition_to(next),
            "illegal level transition {:?} -> {:?}",
            *state,
            next
        );
        *state = next;
    }
}

/// Failure category derived from a check's record and output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorClass {
    ImportError,
    TypeError,
    SyntaxError,
    Timeout,
    Custom(String),
}

impl ErrorClass {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorClass::ImportError => "import_error",
            ErrorClass::TypeError => "type_error",
            ErrorClass::SyntaxError => "syntax_error",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Custom(name) => name,
        }
    }
}

impl From<String> for ErrorClass {
    fn from(name: String) -> Self {
        match name.as_str() {
            "import_error" => ErrorClass::ImportError,
            "type_error" => ErrorClass::TypeError,
            "syntax_error" => ErrorClass::SyntaxError,
            "timeout" => ErrorClass::Timeout,
            _ => ErrorClass::Custom(name),
        }
    }
}

impl From<&str> for ErrorClass {
    fn from(name: &str) -> Self {
        ErrorClass::from(name.to_string())
    }
}

impl From<ErrorClass> for String {
    fn from(class: ErrorClass) -> Self {
        class.as_str().to_string()
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a failed check to an [`ErrorClass`].
///
/// Timeouts come from the record's status, never from text. Configured
/// signatures are tried before the built-in ones.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    custom: Vec<(ErrorClass, Regex)>,
    builtin: Vec<(ErrorClass, Regex)>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            custom: Vec::new(),
            builtin: vec![
                (ErrorClass::ImportError, IMPORT_ERROR_REGEX.clone()),
                (ErrorClass::TypeError, TYPE_ERROR_REGEX.clone()),
                (ErrorClass::SyntaxError, SYNTAX_ERROR_REGEX.clone()),
            ],
        }
    }
}

impl ErrorClassifier {
    pub fn add_signature(&mut self, class: ErrorClass, pattern: &str) -> Result<(), regex::Error> {
        self.custom.push((class, Regex::new(pattern)?));
        Ok(())
    }

    pub fn classify(&self, record: &ExecutionRecord, output: &str) -> Option<ErrorClass> {
        if matches!(record.status, PhaseStatus::TimedOut | PhaseStatus::Killed) {
            return Some(ErrorClass::Timeout);
        }
        self.custom
            .iter()
            .chain(self.builtin.iter())
            .find(|(_, regex)| regex.is_match(output))
            .map(|(class, _)| class.clone())
    }
}

/// Shell lines that attempt to fix a class of failure.
#[derive(Debug, Clone, Default)]
pub struct Remedies {
    by_class: HashMap<ErrorClass, String>,
}

impl Remedies {
    pub fn insert(&mut self, class: ErrorClass, run: &str) {
        self.by_class.insert(class, run.to_string());
    }

    pub fn get(&self, class: &ErrorClass) -> Option<&str> {
        self.by_class.get(class).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemedyRun {
    pub command: String,
    pub status: PhaseStatus,
    pub log: PathBuf,
}

/// One execution of a level's check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationAttempt {
    pub level: String,
    pub attempt: u32,
    pub passed: bool,
    pub status: PhaseStatus,
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remedy: Option<RemedyRun>,
    pub log: PathBuf,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelReport {
    pub name: String,
    pub state: LevelState,
    pub attempts: Vec<ValidationAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Passed,
    AcceptedPartial { level: String },
    Aborted { level: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub levels: Vec<LevelReport>,
    pub outcome: ValidationOutcome,
    pub total_attempts: u32,
    pub global_max_attempts: u32,
}

impl ValidationReport {
    pub fn level(&self, name: &str) -> Option<&LevelReport> {
        self.levels.iter().find(|l| l.name == name)
    }
}

/// Context handed to the operator when a level runs out of attempts.
#[derive(Debug, Clone)]
pub struct LevelExhausted {
    pub level: String,
    pub attempts: u32,
    pub last: Option<ValidationAttempt>,
    /// False once the global budget is spent; pausing would grant nothing
    pub can_pause: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedDecision {
    AcceptPartial,
    PauseForManual,
    Abort,
}

enum Stop {
    Passed(ValidationAttempt),
    Fatal(PhaseError),
}

pub struct ValidationController {
    executor: Arc<ProcessExecutor>,
    classifier: ErrorClassifier,
    remedies: Remedies,
    global_max_attempts: u32,
    backoff: Backoff,
}

impl ValidationController {
    pub fn new(executor: Arc<ProcessExecutor>, global_max_attempts: u32) -> Self {
        Self {
            executor,
            classifier: ErrorClassifier::default(),
            remedies: Remedies::default(),
            global_max_attempts,
            backoff: Backoff::None,
        }
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_remedies(mut self, remedies: Remedies) -> Self {
        self.remedies = remedies;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run the cascade.
    ///
    /// `Err` only for audit or log-sink failures; every validation outcome,
    /// including an abort, is reported through [`ValidationReport`].
    pub async fn run(
        &self,
        levels: &[ValidationLevel],
        operator: &mut dyn Operator,
    ) -> Result<ValidationReport, PhaseError> {
        let mut global = RetryBudget::new(self.global_max_attempts);
        let mut reports: Vec<LevelReport> = levels
            .iter()
            .map(|level| LevelReport {
                name: level.name.clone(),
                state: LevelState::Pending,
                attempts: Vec::new(),
            })
            .collect();
        let mut outcome = ValidationOutcome::Passed;

        'levels: for (index, level) in levels.iter().enumerate() {
            let tracker = LevelTracker::new();
            info!(level = %level.name, "validation level started");

            loop {
                let allowed = level.max_attempts.min(global.remaining());
                let base = reports[index].attempts.len() as u32;
                let policy = RetryPolicy::new(allowed).with_backoff(self.backoff);
                let tracker_ref = &tracker;
                let can_pause = global.remaining() > allowed;

                let result = policy
                    .run(
                        move |attempt| {
                            self.attempt_level(level, tracker_ref, base + attempt, attempt < allowed)
                        },
                        |failures: &[ValidationAttempt]| {
                            tracker_ref.advance(LevelState::Exhausted);
                            let exhausted = LevelExhausted {
                                level: level.name.clone(),
                                attempts: base + failures.len() as u32,
                                last: failures.last().cloned(),
                                can_pause,
                            };
                            warn!(
                                level = %level.name,
                                attempts = exhausted.attempts,
                                "validation level exhausted"
                            );
                            operator.on_validation_exhausted(&exhausted)
                        },
                    )
                    .await;

                global.consume(result.attempts());
                reports[index].attempts.extend(result.failures);

                match result.result {
                    RetryResult::Succeeded(Stop::Passed(attempt)) => {
                        reports[index].attempts.push(attempt);
                        reports[index].state = tracker.get();
                        info!(level = %level.name, "validation level passed");
                        continue 'levels;
                    }
                    RetryResult::Succeeded(Stop::Fatal(err)) => return Err(err),
                    RetryResult::Exhausted(decision) => {
                        reports[index].state = tracker.get();
                        self.record_decision(level, decision)?;
                        match decision {
                            ExhaustedDecision::PauseForManual if global.remaining() > 0 => {
                                info!(level = %level.name, "resuming level after manual fix");
                                continue;
                            }
                            ExhaustedDecision::AcceptPartial => {
                                outcome = ValidationOutcome::AcceptedPartial {
                                    level: level.name.clone(),
                                };
                            }
                            ExhaustedDecision::PauseForManual | ExhaustedDecision::Abort => {
                                outcome = ValidationOutcome::Aborted {
                                    level: level.name.clone(),
                                };
                            }
                        }
                        break 'levels;
                    }
                }
            }
        }

        Ok(ValidationReport {
            levels: reports,
            outcome,
            total_attempts: global.used(),
            global_max_attempts: self.global_max_attempts,
        })
    }

    async fn attempt_level(
        &self,
        level: &ValidationLevel,
        tracker: &LevelTracker,
        attempt: u32,
        may_remedy: bool,
    ) -> Result<Stop, ValidationAttempt> {
        tracker.advance(LevelState::Running);
        let phase = level.as_phase();
        let request = LaunchRequest::new(&phase).with_attempt(attempt);

        let record = match self.executor.run(request).await {
            Ok(record) => record,
            Err(err) => return Ok(Stop::Fatal(err)),
        };

        let mut result = ValidationAttempt {
            level: level.name.clone(),
            attempt,
            passed: record.succeeded(),
            status: record.status,
            exit_code: record.exit_code,
            error_class: None,
            remedy: None,
            log: record.log_path.clone(),
            duration_ms: record.duration.as_millis() as u64,
        };

        if result.passed {
            tracker.advance(LevelState::Passed);
            if let Err(err) = self.record_attempt(&phase, &result) {
                return Ok(Stop::Fatal(err));
            }
            return Ok(Stop::Passed(result));
        }

        tracker.advance(LevelState::Failed);
        let output = record.read_output();
        result.error_class = self.classifier.classify(&record, &output);

        if may_remedy
            && let Some(class) = &result.error_class
            && let Some(command) = self.remedies.get(class)
        {
            match self.apply_remedy(level, class, command, attempt).await {
                Ok(remedy) => result.remedy = Some(remedy),
                Err(err) => return Ok(Stop::Fatal(err)),
            }
        }

        if let Err(err) = self.record_attempt(&phase, &result) {
            return Ok(Stop::Fatal(err));
        }
        Err(result)
    }

    async fn apply_remedy(
        &self,
        level: &ValidationLevel,
        class: &ErrorClass,
        command: &str,
        attempt: u32,
    ) -> Result<RemedyRun, PhaseError> {
        info!(level = %level.name, class = %class, "applying remedy");
        let phase = Phase::shell(&format!("remedy:{class}"), command).with_timeout(level.timeout);
        let record = self
            .executor
            .run(LaunchRequest::new(&phase).with_attempt(attempt))
            .await?;
        if !record.succeeded() {
            warn!(
                level = %level.name,
                class = %class,
                status = %record.status,
                "remedy did not succeed"
            );
        }
        Ok(RemedyRun {
            command: command.to_string(),
            status: record.status,
            log: record.log_path,
        })
    }

    fn record_attempt(&self, phase: &Phase, attempt: &ValidationAttempt) -> Result<(), PhaseError> {
        let detail = match (&attempt.error_class, &attempt.remedy) {
            _ if attempt.passed => "passed".to_string(),
            (Some(class), Some(remedy)) => format!("failed: {class}; remedy {}", remedy.status),
            (Some(class), None) => format!("failed: {class}"),
            (None, _) => "failed: unclassified".to_string(),
        };
        self.executor.audit().append(
            AuditEntry::event(&phase.name, events::VALIDATION_ATTEMPT, detail)
                .with_attempt(attempt.attempt)
                .with_log(&attempt.log),
        )?;
        Ok(())
    }

    fn record_decision(
        &self,
        level: &ValidationLevel,
        decision: ExhaustedDecision,
    ) -> Result<(), PhaseError> {
        let detail = match decision {
            ExhaustedDecision::AcceptPartial => "accept_partial",
            ExhaustedDecision::PauseForManual => "pause_for_manual",
            ExhaustedDecision::Abort => "abort",
        };
        self.executor.audit().append(AuditEntry::event(
            &level.phase_name(),
            events::OPERATOR_DECISION,
            detail,
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::executor::{AgentInvocation, ExecutorConfig};
    use crate::operator::QueuedOperator;
    use chrono::Utc;
    use tempfile::{TempDir, tempdir};

    fn controller(dir: &TempDir, global: u32) -> ValidationController {
        let audit = Arc::new(AuditLog::new(dir.path().join("audit.jsonl")));
        let executor = Arc::new(ProcessExecutor::new(
            ExecutorConfig {
                workflow: "wf".into(),
                log_dir: dir.path().join("logs"),
                working_dir: dir.path().to_path_buf(),
                grace_period: Duration::from_millis(200),
                agent: AgentInvocation::default(),
            },
            audit,
        ));
        ValidationController::new(executor, global)
    }

    fn record(status: PhaseStatus) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            phase: "validate:x".into(),
            status,
            exit_code: Some(1),
            duration: Duration::ZERO,
            started_at: now,
            finished_at: now,
            attempt: 1,
            group: None,
            log_path: PathBuf::from("x.log"),
            error: None,
        }
    }

    #[test]
    fn test_level_state_transitions() {
        assert!(LevelState::Pending.can_transition_to(LevelState::Running));
        assert!(LevelState::Failed.can_transition_to(LevelState::Running));
        assert!(LevelState::Failed.can_transition_to(LevelState::Exhausted));
        assert!(!LevelState::Pending.can_transition_to(LevelState::Passed));
        assert!(!LevelState::Passed.can_transition_to(LevelState::Running));
    }

    #[test]
    fn test_classifier_builtin_signatures() {
        let classifier = ErrorClassifier::default();
        let failed = record(PhaseStatus::Failed);
        assert_eq!(
            classifier.classify(&failed, "ModuleNotFoundError: No module named 'requests'"),
            Some(ErrorClass::ImportError)
        );
        assert_eq!(
            classifier.classify(&failed, "error[E0308]: mismatched types"),
            Some(ErrorClass::TypeError)
        );
        assert_eq!(
            classifier.classify(&failed, "SyntaxError: invalid syntax"),
            Some(ErrorClass::SyntaxError)
        );
        assert_eq!(classifier.classify(&failed, "something else"), None);
    }

    #[test]
    fn test_timeout_comes_from_status_not_text() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.classify(&record(PhaseStatus::TimedOut), "SyntaxError"),
            Some(ErrorClass::Timeout)
        );
        assert_eq!(
            classifier.classify(&record(PhaseStatus::Failed), "operation timed out"),
            None
        );
    }

    #[test]
    fn test_custom_signatures_win_over_builtin() {
        let mut classifier = ErrorClassifier::default();
        classifier
            .add_signature(ErrorClass::from("lint"), r"(?i)clippy::")
            .unwrap();
        assert_eq!(
            classifier.classify(&record(PhaseStatus::Failed), "clippy::needless_return TypeError"),
            Some(ErrorClass::Custom("lint".into()))
        );
        assert!(classifier.add_signature(ErrorClass::from("bad"), "(").is_err());
    }

    #[test]
    fn test_error_class_string_roundtrip() {
        assert_eq!(ErrorClass::from("import_error"), ErrorClass::ImportError);
        assert_eq!(String::from(ErrorClass::Timeout), "timeout");
        let json = serde_json::to_string(&ErrorClass::Custom("lint".into())).unwrap();
        assert_eq!(json, "\"lint\"");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cascade_passes_in_order() {
        let dir = tempdir().unwrap();
        let controller = controller(&dir, 9);
        let levels = vec![
            ValidationLevel::new("style", "true"),
            ValidationLevel::new("types", "true"),
        ];
        let mut operator = QueuedOperator::default();

        let report = controller.run(&levels, &mut operator).await.unwrap();

        assert_eq!(report.outcome, ValidationOutcome::Passed);
        assert_eq!(report.total_attempts, 2);
        assert!(report.levels.iter().all(|l| l.state == LevelState::Passed));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remedy_runs_between_attempts_and_fix_sticks() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("installed");
        let mut remedies = Remedies::default();
        remedies.insert(ErrorClass::ImportError, &format!("touch {}", marker.display()));
        let controller = controller(&dir, 9).with_remedies(remedies);
        let check = format!(
            "test -f {} || {{ echo 'ImportError: No module named foo'; exit 1; }}",
            marker.display()
        );
        let levels = vec![ValidationLevel::new("imports", &check)];
        let mut operator = QueuedOperator::default();

        let report = controller.run(&levels, &mut operator).await.unwrap();

        assert_eq!(report.outcome, ValidationOutcome::Passed);
        let level = report.level("imports").unwrap();
        assert_eq!(level.attempts.len(), 2);
        assert_eq!(level.attempts[0].error_class, Some(ErrorClass::ImportError));
        assert_eq!(
            level.attempts[0].remedy.as_ref().map(|r| r.status),
            Some(PhaseStatus::Succeeded)
        );
        assert!(level.attempts[1].passed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exhausted_level_stops_cascade_and_aborts() {
        let dir = tempdir().unwrap();
        let controller = controller(&dir, 9);
        let levels = vec![
            ValidationLevel::new("style", "exit 1").with_max_attempts(2),
            ValidationLevel::new("types", "true"),
        ];
        let mut operator = QueuedOperator::default();

        let report = controller.run(&levels, &mut operator).await.unwrap();

        assert_eq!(
            report.outcome,
            ValidationOutcome::Aborted {
                level: "style".into()
            }
        );
        assert_eq!(report.levels[0].state, LevelState::Exhausted);
        assert_eq!(report.levels[0].attempts.len(), 2);
        assert_eq!(report.levels[1].state, LevelState::Pending);
        assert!(report.levels[1].attempts.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_accept_partial_is_recorded() {
        let dir = tempdir().unwrap();
        let controller = controller(&dir, 9);
        let levels = vec![ValidationLevel::new("style", "exit 1").with_max_attempts(1)];
        let mut operator =
            QueuedOperator::default().with_exhausted(vec![ExhaustedDecision::AcceptPartial]);

        let report = controller.run(&levels, &mut operator).await.unwrap();

        assert_eq!(
            report.outcome,
            ValidationOutcome::AcceptedPartial {
                level: "style".into()
            }
        );
        let audit = controller.executor.audit().entries().unwrap();
        assert!(audit.iter().any(|e| {
            e.event.as_deref() == Some("operator_decision")
                && e.detail.as_deref() == Some("accept_partial")
        }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_global_budget_caps_attempts_across_levels() {
        let dir = tempdir().unwrap();
        let controller = controller(&dir, 3);
        let levels = vec![
            ValidationLevel::new("first", "true"),
            ValidationLevel::new("second", "exit 1").with_max_attempts(5),
        ];
        let mut operator = QueuedOperator::default();

        let report = controller.run(&levels, &mut operator).await.unwrap();

        assert_eq!(report.total_attempts, 3);
        assert_eq!(report.level("second").unwrap().attempts.len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pause_for_manual_grants_a_fresh_level_budget() {
        let dir = tempdir().unwrap();
        let controller = controller(&dir, 9);
        let levels = vec![ValidationLevel::new("flaky", "exit 1").with_max_attempts(1)];
        let mut operator = QueuedOperator::default().with_exhausted(vec![
            ExhaustedDecision::PauseForManual,
            ExhaustedDecision::Abort,
        ]);

        let report = controller.run(&levels, &mut operator).await.unwrap();

        let level = report.level("flaky").unwrap();
        assert_eq!(level.attempts.len(), 2);
        assert_eq!(level.attempts[1].attempt, 2);
        assert!(matches!(report.outcome, ValidationOutcome::Aborted { .. }));
    }
}
