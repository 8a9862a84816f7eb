//! Dependency-gated phase runner.
//!
//! Walks the planned steps of a [`PhaseGraph`] in declared order. Before a
//! step launches, every dependency of every member must have a most recent
//! audit status of `succeeded` (or be in the caller's already-succeeded set);
//! otherwise the step is blocked and nothing is launched. A failed step is
//! handed to the [`Operator`], who picks retry, retry with a longer timeout,
//! skip, or abort.
//!
//! Blocked steps never consume the retry budget; each step gets its own
//! budget of `max_phase_retries`.

use crate::audit::{AuditEntry, AuditLog, ExecutionRecord, PhaseStatus, events, latest_lifecycle};
use crate::errors::{OrchestratorError, PhaseError};
use crate::executor::{LaunchRequest, ProcessExecutor};
use crate::graph::{PhaseGraph, Step};
use crate::group::{GroupCoordinator, GroupRun};
use crate::operator::Operator;
use crate::phase::Phase;
use crate::retry::RetryBudget;
use crate::ui::RunProgress;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunnerConfig {
    /// Retries granted to each step after its first attempt
    pub max_phase_retries: u32,
    /// Multiplier applied to the timeout on "retry with increased timeout"
    pub timeout_backoff: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_phase_retries: 2,
            timeout_backoff: 2.0,
        }
    }
}

/// A step that cannot start because a dependency has not succeeded.
#[derive(Debug, Clone)]
pub struct BlockedPhase {
    /// Phase name, or group name for a group step
    pub step: String,
    pub group: Option<String>,
    /// Members that were about to run
    pub phases: Vec<String>,
    pub dependency: String,
    pub dependency_status: Option<PhaseStatus>,
    /// Log of the dependency's most recent attempt, if it ever ran
    pub dependency_log: Option<PathBuf>,
}

impl BlockedPhase {
    pub fn to_error(&self) -> PhaseError {
        PhaseError::Blocked {
            phase: self.step.clone(),
            dependency: self.dependency.clone(),
            dependency_status: self.dependency_status,
        }
    }
}

/// A step whose latest attempt left at least one member unsuccessful.
#[derive(Debug, Clone)]
pub struct PhaseFailure {
    pub step: String,
    pub group: Option<String>,
    /// Records of the members that did not succeed
    pub failed: Vec<ExecutionRecord>,
    pub retries_used: u32,
    pub retries_remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Retry,
    RetryWithLongerTimeout,
    Skip,
    Abort,
}

impl FailureDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureDecision::Retry => "retry",
            FailureDecision::RetryWithLongerTimeout => "retry_with_longer_timeout",
            FailureDecision::Skip => "skip",
            FailureDecision::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedDecision {
    Skip,
    Abort,
}

impl BlockedDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockedDecision::Skip => "skip",
            BlockedDecision::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    CompletedWithSkips,
    Aborted { at: String, reason: String },
}

impl RunOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, RunOutcome::Aborted { .. })
    }
}

/// Everything one pass over the graph produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Every attempt in the order it finished
    pub records: Vec<ExecutionRecord>,
    pub groups: Vec<GroupRun>,
    pub blocked: Vec<String>,
    pub skipped: Vec<String>,
    pub resumed: Vec<String>,
    pub audit: PathBuf,
}

#[derive(Default)]
struct RunState {
    records: Vec<ExecutionRecord>,
    groups: Vec<GroupRun>,
    blocked: Vec<String>,
    skipped: Vec<String>,
    resumed: Vec<String>,
}

impl RunState {
    fn finish(self, audit: &AuditLog, aborted: Option<(String, String)>) -> RunResult {
        let outcome = match aborted {
            Some((at, reason)) => RunOutcome::Aborted { at, reason },
            None if self.skipped.is_empty() => RunOutcome::Completed,
            None => RunOutcome::CompletedWithSkips,
        };
        RunResult {
            run_id: audit.run_id(),
            outcome,
            records: self.records,
            groups: self.groups,
            blocked: self.blocked,
            skipped: self.skipped,
            resumed: self.resumed,
            audit: audit.path().to_path_buf(),
        }
    }
}

pub struct PhaseRunner {
    executor: Arc<ProcessExecutor>,
    coordinator: GroupCoordinator,
    progress: Arc<RunProgress>,
    config: RunnerConfig,
}

impl PhaseRunner {
    pub fn new(
        executor: Arc<ProcessExecutor>,
        progress: Arc<RunProgress>,
        config: RunnerConfig,
    ) -> Self {
        let coordinator = GroupCoordinator::new(Arc::clone(&executor), Arc::clone(&progress));
        Self {
            executor,
            coordinator,
            progress,
            config,
        }
    }

    fn audit(&self) -> &AuditLog {
        self.executor.audit()
    }

    /// Run every step of the graph.
    pub async fn run(
        &self,
        graph: &PhaseGraph,
        operator: &mut dyn Operator,
    ) -> Result<RunResult, PhaseError> {
        self.run_from(graph, &HashSet::new(), operator).await
    }

    /// Run the graph, skipping phases in `already_succeeded`.
    ///
    /// Skipped-as-done phases also satisfy their dependents' gate, so a
    /// resumed run behaves like the tail of one continuous run.
    pub async fn run_from(
        &self,
        graph: &PhaseGraph,
        already_succeeded: &HashSet<String>,
        operator: &mut dyn Operator,
    ) -> Result<RunResult, PhaseError> {
        let mut state = RunState::default();
        let mut attempts = self.audit().attempt_counts().map_err(OrchestratorError::from)?;
        let mut timeouts: HashMap<String, Duration> = graph
            .phases()
            .iter()
            .map(|p| (p.name.clone(), p.timeout))
            .collect();
        self.progress.set_total(graph.len() as u64);

        info!(phases = graph.len(), steps = graph.steps().len(), "running phase graph");

        for step in graph.steps() {
            let mut pending = Vec::new();
            for phase in step.phases() {
                if already_succeeded.contains(&phase.name) {
                    self.audit()
                        .append(AuditEntry::event(&phase.name, events::RESUMED, "already succeeded"))?;
                    self.progress.phase_resumed(&phase.name);
                    state.resumed.push(phase.name.clone());
                } else {
                    pending.push(phase);
                }
            }
            if pending.is_empty() {
                continue;
            }

            if let Some(blocked) = self.check_dependencies(step, &pending, already_succeeded)? {
                match self.handle_blocked(&blocked, &mut state, operator)? {
                    BlockedDecision::Skip => continue,
                    BlockedDecision::Abort => {
                        let reason = blocked.to_error().to_string();
                        return Ok(state.finish(self.audit(), Some((blocked.step, reason))));
                    }
                }
            }

            let mut budget = RetryBudget::new(self.config.max_phase_retries);
            loop {
                let failed = self
                    .execute(step, &pending, &timeouts, &mut attempts, &mut state)
                    .await?;
                if failed.is_empty() {
                    break;
                }

                let failure = PhaseFailure {
                    step: step.label().to_string(),
                    group: step.group().map(str::to_string),
                    failed,
                    retries_used: budget.used(),
                    retries_remaining: budget.remaining(),
                };
                let decision = operator.on_phase_failure(&failure);
                self.audit().append(AuditEntry::event(
                    step.label(),
                    events::OPERATOR_DECISION,
                    decision.as_str(),
                ))?;
                info!(step = %failure.step, decision = decision.as_str(), "failure decision");

                match decision {
                    FailureDecision::Retry | FailureDecision::RetryWithLongerTimeout
                        if !budget.is_exhausted() =>
                    {
                        budget.consume(1);
                        if decision == FailureDecision::RetryWithLongerTimeout {
                            for record in &failure.failed {
                                if let Some(timeout) = timeouts.get_mut(&record.phase) {
                                    *timeout = timeout.mul_f64(self.config.timeout_backoff);
                                }
                            }
                        }
                        pending.retain(|p| failure.failed.iter().any(|r| r.phase == p.name));
                        self.progress.extend_total(pending.len() as u64);
                    }
                    FailureDecision::Skip => {
                        for record in &failure.failed {
                            self.audit().append(AuditEntry::event(
                                &record.phase,
                                events::SKIPPED,
                                format!("left {} by operator", record.status),
                            ))?;
                            self.progress.phase_left_failed(&record.phase);
                            state.skipped.push(record.phase.clone());
                        }
                        break;
                    }
                    FailureDecision::Retry
                    | FailureDecision::RetryWithLongerTimeout
                    | FailureDecision::Abort => {
                        if decision != FailureDecision::Abort {
                            warn!(step = %failure.step, "retry requested with no budget left, aborting");
                        }
                        let reason = failure
                            .failed
                            .first()
                            .map(|record| record_error(record, &timeouts).to_string())
                            .unwrap_or_default();
                        return Ok(state.finish(self.audit(), Some((failure.step, reason))));
                    }
                }
            }
        }

        Ok(state.finish(self.audit(), None))
    }

    /// First unmet dependency of any pending member, if any.
    fn check_dependencies(
        &self,
        step: &Step,
        pending: &[&Phase],
        already_succeeded: &HashSet<String>,
    ) -> Result<Option<BlockedPhase>, PhaseError> {
        let entries = self.audit().entries().map_err(OrchestratorError::from)?;
        let latest = latest_lifecycle(&entries);

        for phase in pending {
            for dependency in &phase.depends_on {
                if already_succeeded.contains(dependency) {
                    continue;
                }
                let latest_entry = latest.get(dependency.as_str());
                let status = latest_entry.and_then(|e| e.status);
                if status != Some(PhaseStatus::Succeeded) {
                    return Ok(Some(BlockedPhase {
                        step: step.label().to_string(),
                        group: step.group().map(str::to_string),
                        phases: pending.iter().map(|p| p.name.clone()).collect(),
                        dependency: dependency.clone(),
                        dependency_status: status,
                        dependency_log: latest_entry.and_then(|e| e.log.clone()),
                    }));
                }
            }
        }
        Ok(None)
    }

    fn handle_blocked(
        &self,
        blocked: &BlockedPhase,
        state: &mut RunState,
        operator: &mut dyn Operator,
    ) -> Result<BlockedDecision, PhaseError> {
        let detail = blocked.to_error().to_string();
        warn!(step = %blocked.step, dependency = %blocked.dependency, "step blocked");
        for phase in &blocked.phases {
            self.audit()
                .append(AuditEntry::event(phase, events::BLOCKED, detail.as_str()))?;
            self.progress.phase_blocked(phase, &blocked.dependency);
            state.blocked.push(phase.clone());
        }

        let decision = operator.on_blocked(blocked);
        self.audit().append(AuditEntry::event(
            &blocked.step,
            events::OPERATOR_DECISION,
            decision.as_str(),
        ))?;
        if decision == BlockedDecision::Skip {
            for phase in &blocked.phases {
                self.audit()
                    .append(AuditEntry::event(phase, events::SKIPPED, "blocked"))?;
                self.progress.phase_skipped(phase);
                state.skipped.push(phase.clone());
            }
        }
        Ok(decision)
    }

    /// Launch one attempt of the pending members; returns the failed records.
    async fn execute(
        &self,
        step: &Step,
        pending: &[&Phase],
        timeouts: &HashMap<String, Duration>,
        attempts: &mut HashMap<String, u32>,
        state: &mut RunState,
    ) -> Result<Vec<ExecutionRecord>, PhaseError> {
        let requests: Vec<LaunchRequest<'_>> = pending
            .iter()
            .map(|phase| {
                let attempt = attempts.entry(phase.name.clone()).or_insert(0);
                *attempt += 1;
                LaunchRequest::new(phase)
                    .with_timeout(timeouts.get(&phase.name).copied().unwrap_or(phase.timeout))
                    .with_attempt(*attempt)
            })
            .collect();

        let records = match step.group() {
            Some(group) => {
                self.progress.group_started(group, requests.len());
                let run = self.coordinator.run_requests(group, &requests).await?;
                let records = run.records.clone();
                state.groups.push(run);
                records
            }
            None => {
                let mut records = Vec::with_capacity(requests.len());
                for request in requests {
                    self.progress.phase_started(&request.phase.name, None);
                    let record = self.executor.run(request).await?;
                    self.progress.phase_finished(&record);
                    records.push(record);
                }
                records
            }
        };

        let failed = records.iter().filter(|r| !r.succeeded()).cloned().collect();
        state.records.extend(records);
        Ok(failed)
    }
}

/// Typed error for a record that did not succeed.
fn record_error(record: &ExecutionRecord, timeouts: &HashMap<String, Duration>) -> PhaseError {
    let log = record.log_path.clone();
    let phase = record.phase.clone();
    match record.status {
        PhaseStatus::TimedOut => PhaseError::TimedOut {
            timeout_secs: timeouts
                .get(&phase)
                .map(Duration::as_secs)
                .unwrap_or_else(|| record.duration.as_secs()),
            phase,
            log,
        },
        PhaseStatus::Killed => PhaseError::Killed { phase, log },
        _ => PhaseError::Failed {
            phase,
            exit_code: record.exit_code.unwrap_or(-1),
            log,
        },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::executor::{AgentInvocation, ExecutorConfig};
    use crate::graph::GraphBuilder;
    use crate::operator::QueuedOperator;
    use tempfile::{TempDir, tempdir};

    fn runner(dir: &TempDir, config: RunnerConfig) -> (PhaseRunner, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::new(dir.path().join("audit.jsonl")));
        let executor = Arc::new(ProcessExecutor::new(
            ExecutorConfig {
                workflow: "wf".into(),
                log_dir: dir.path().join("logs"),
                working_dir: dir.path().to_path_buf(),
                grace_period: Duration::from_millis(200),
                agent: AgentInvocation::default(),
            },
            Arc::clone(&audit),
        ));
        (
            PhaseRunner::new(executor, Arc::new(RunProgress::hidden()), config),
            audit,
        )
    }

    fn graph(phases: Vec<Phase>) -> PhaseGraph {
        GraphBuilder::new(phases).build().unwrap()
    }

    // Fails on the first invocation, succeeds afterwards.
    const FLAKY: &str = "test -f flaky.marker || { touch flaky.marker; exit 1; }";

    #[tokio::test]
    async fn test_sequential_chain_completes() {
        let dir = tempdir().unwrap();
        let (runner, audit) = runner(&dir, RunnerConfig::default());
        let g = graph(vec![
            Phase::shell("a", "true"),
            Phase::shell("b", "true").depends_on(&["a"]),
        ]);

        let result = runner.run(&g, &mut QueuedOperator::default()).await.unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.records.len(), 2);
        assert!(audit.coverage(&["a", "b"]).unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_blocked_phase_is_never_launched() {
        let dir = tempdir().unwrap();
        let (runner, audit) = runner(&dir, RunnerConfig::default());
        let g = graph(vec![
            Phase::shell("a", "exit 4"),
            Phase::shell("b", "true").depends_on(&["a"]),
            Phase::shell("c", "true"),
        ]);
        let mut operator = QueuedOperator::default()
            .with_failures(vec![FailureDecision::Skip])
            .with_blocked(vec![BlockedDecision::Skip]);

        let result = runner.run(&g, &mut operator).await.unwrap();

        assert_eq!(result.outcome, RunOutcome::CompletedWithSkips);
        assert_eq!(result.blocked, vec!["b".to_string()]);
        assert_eq!(result.skipped, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(audit.most_recent_status("b").unwrap(), None);
        assert_eq!(
            audit.most_recent_status("c").unwrap(),
            Some(PhaseStatus::Succeeded)
        );
        assert!(operator.transcript[1].contains("a"));
    }

    #[tokio::test]
    async fn test_blocked_defaults_to_abort_naming_dependency() {
        let dir = tempdir().unwrap();
        let (runner, _) = runner(&dir, RunnerConfig::default());
        let g = graph(vec![
            Phase::shell("a", "exit 1"),
            Phase::shell("b", "true").depends_on(&["a"]),
        ]);
        let mut operator = QueuedOperator::default().with_failures(vec![FailureDecision::Skip]);

        let result = runner.run(&g, &mut operator).await.unwrap();

        match result.outcome {
            RunOutcome::Aborted { at, reason } => {
                assert_eq!(at, "b");
                assert!(reason.contains("dependency a is failed"), "{reason}");
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_runs_a_new_attempt() {
        let dir = tempdir().unwrap();
        let (runner, audit) = runner(&dir, RunnerConfig::default());
        let g = graph(vec![Phase::shell("flaky", FLAKY)]);
        let mut operator = QueuedOperator::default().with_failures(vec![FailureDecision::Retry]);

        let result = runner.run(&g, &mut operator).await.unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        let attempts: Vec<u32> = result.records.iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2]);
        assert!(dir.path().join("logs/flaky-1.log").exists());
        assert!(dir.path().join("logs/flaky-2.log").exists());
        assert_eq!(
            audit.most_recent_status("flaky").unwrap(),
            Some(PhaseStatus::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_retry_with_longer_timeout_scales_only_that_phase() {
        let dir = tempdir().unwrap();
        let (runner, _) = runner(
            &dir,
            RunnerConfig {
                max_phase_retries: 1,
                timeout_backoff: 10.0,
            },
        );
        let g = graph(vec![
            Phase::shell("slowish", "sleep 0.6").with_timeout(Duration::from_millis(200)),
        ]);
        let mut operator = QueuedOperator::default()
            .with_failures(vec![FailureDecision::RetryWithLongerTimeout]);

        let result = runner.run(&g, &mut operator).await.unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.records[0].status, PhaseStatus::TimedOut);
        assert_eq!(result.records[1].status, PhaseStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_group_retry_reruns_only_failed_members() {
        let dir = tempdir().unwrap();
        let (runner, _) = runner(&dir, RunnerConfig::default());
        let g = graph(vec![
            Phase::shell("steady", "true").in_group("g"),
            Phase::shell("flaky", FLAKY).in_group("g"),
        ]);
        let mut operator = QueuedOperator::default().with_failures(vec![FailureDecision::Retry]);

        let result = runner.run(&g, &mut operator).await.unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.groups[1].records.len(), 1);
        assert_eq!(result.groups[1].records[0].phase, "flaky");
        let steady = result.records.iter().filter(|r| r.phase == "steady").count();
        assert_eq!(steady, 1);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let dir = tempdir().unwrap();
        let (runner, _) = runner(
            &dir,
            RunnerConfig {
                max_phase_retries: 1,
                timeout_backoff: 2.0,
            },
        );
        let g = graph(vec![Phase::shell("doomed", "exit 2")]);
        let mut operator = QueuedOperator::default()
            .with_failures(vec![FailureDecision::Retry, FailureDecision::Retry]);

        let result = runner.run(&g, &mut operator).await.unwrap();

        assert_eq!(result.records.len(), 2);
        match result.outcome {
            RunOutcome::Aborted { at, reason } => {
                assert_eq!(at, "doomed");
                assert!(reason.contains("exit code 2"), "{reason}");
                assert!(reason.contains("doomed-2.log"), "{reason}");
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(operator.transcript.len(), 2);
    }

    #[tokio::test]
    async fn test_resume_skips_already_succeeded_phases() {
        let dir = tempdir().unwrap();
        let (runner, audit) = runner(&dir, RunnerConfig::default());
        let g = graph(vec![
            Phase::shell("a", "exit 9"),
            Phase::shell("b", "true").depends_on(&["a"]),
        ]);
        let done: HashSet<String> = ["a".to_string()].into_iter().collect();

        let result = runner
            .run_from(&g, &done, &mut QueuedOperator::default())
            .await
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.resumed, vec!["a".to_string()]);
        assert_eq!(result.records.len(), 1);
        assert_eq!(audit.most_recent_status("a").unwrap(), None);
    }

    #[tokio::test]
    async fn test_resume_from_audit_equals_continuous_run() {
        let dir = tempdir().unwrap();
        let (runner, audit) = runner(&dir, RunnerConfig::default());
        let phases = vec![
            Phase::shell("a", "true"),
            Phase::shell("b", "test -f go.marker").depends_on(&["a"]),
        ];
        let g = graph(phases);

        let first = runner.run(&g, &mut QueuedOperator::default()).await.unwrap();
        assert!(first.outcome.is_aborted());

        std::fs::write(dir.path().join("go.marker"), "").unwrap();
        let done = audit.succeeded_phases().unwrap();
        let second = runner
            .run_from(&g, &done, &mut QueuedOperator::default())
            .await
            .unwrap();

        assert_eq!(second.outcome, RunOutcome::Completed);
        assert_eq!(second.resumed, vec!["a".to_string()]);
        assert_eq!(second.records[0].attempt, 2);
        assert!(audit.coverage(&["a", "b"]).unwrap().is_complete());
    }
}
