//! Parallel group coordinator.
//!
//! Every member of a group is launched before any is awaited, then results
//! are collected in completion order. Each member's terminal record reaches
//! the audit log as soon as that member finishes, independent of its
//! siblings.

use crate::audit::{ExecutionRecord, PhaseStatus};
use crate::errors::PhaseError;
use crate::executor::{LaunchRequest, ProcessExecutor};
use crate::phase::Phase;
use crate::ui::RunProgress;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Outcome of one concurrent group invocation.
#[derive(Debug, Clone, Serialize)]
pub struct GroupRun {
    pub group: String,
    /// Member records in completion order
    pub records: Vec<ExecutionRecord>,
    #[serde(serialize_with = "serialize_millis")]
    pub wall_duration: Duration,
}

impl GroupRun {
    /// `succeeded` iff every member succeeded, otherwise `failed`.
    pub fn status(&self) -> PhaseStatus {
        if self.records.iter().all(ExecutionRecord::succeeded) {
            PhaseStatus::Succeeded
        } else {
            PhaseStatus::Failed
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter().filter(|r| !r.succeeded())
    }

    /// What the group would have taken run one member after another.
    pub fn sequential_estimate(&self) -> Duration {
        self.records.iter().map(|r| r.duration).sum()
    }

    pub fn speedup(&self) -> f64 {
        let wall = self.wall_duration.as_secs_f64();
        if wall <= f64::EPSILON {
            return 1.0;
        }
        self.sequential_estimate().as_secs_f64() / wall
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

pub struct GroupCoordinator {
    executor: Arc<ProcessExecutor>,
    progress: Arc<RunProgress>,
}

impl GroupCoordinator {
    pub fn new(executor: Arc<ProcessExecutor>, progress: Arc<RunProgress>) -> Self {
        Self { executor, progress }
    }

    /// Run phases as one group: first attempt, each with its own timeout.
    pub async fn run_group(&self, group: &str, phases: &[Phase]) -> Result<GroupRun, PhaseError> {
        let requests: Vec<LaunchRequest<'_>> = phases.iter().map(LaunchRequest::new).collect();
        self.run_requests(group, &requests).await
    }

    /// Launch every request, then await all of them concurrently.
    pub async fn run_requests(
        &self,
        group: &str,
        requests: &[LaunchRequest<'_>],
    ) -> Result<GroupRun, PhaseError> {
        let started = Instant::now();
        let mut records = Vec::with_capacity(requests.len());
        let mut pending = FuturesUnordered::new();

        info!(group, members = requests.len(), "launching group");
        for request in requests {
            match self.executor.launch(*request) {
                Ok(running) => {
                    self.progress.phase_started(&request.phase.name, Some(group));
                    pending.push(running.finish());
                }
                Err(err @ PhaseError::SpawnFailed { .. }) => {
                    let record = self.executor.record_spawn_failure(*request, &err)?;
                    self.progress.phase_finished(&record);
                    records.push(record);
                }
                Err(err) => return Err(err),
            }
        }

        while let Some(result) = pending.next().await {
            let record = result?;
            self.progress.phase_finished(&record);
            records.push(record);
        }

        let run = GroupRun {
            group: group.to_string(),
            records,
            wall_duration: started.elapsed(),
        };
        info!(
            group,
            status = %run.status(),
            wall_ms = run.wall_duration.as_millis() as u64,
            sequential_ms = run.sequential_estimate().as_millis() as u64,
            "group finished"
        );
        Ok(run)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::executor::{AgentInvocation, ExecutorConfig};
    use tempfile::{TempDir, tempdir};

    fn coordinator(dir: &TempDir) -> (GroupCoordinator, Arc<AuditLog>) {
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
            GroupCoordinator::new(executor, Arc::new(RunProgress::hidden())),
            audit,
        )
    }

    #[tokio::test]
    async fn test_members_run_concurrently() {
        let dir = tempdir().unwrap();
        let (coordinator, _) = coordinator(&dir);
        let phases: Vec<Phase> = ["a", "b", "c"]
            .iter()
            .map(|n| Phase::shell(n, "sleep 1").in_group("g"))
            .collect();

        let run = coordinator.run_group("g", &phases).await.unwrap();

        assert_eq!(run.records.len(), 3);
        assert_eq!(run.status(), PhaseStatus::Succeeded);
        assert!(
            run.wall_duration < Duration::from_millis(2500),
            "group took {:?}",
            run.wall_duration
        );
        assert!(run.sequential_estimate() >= Duration::from_secs(3));
        assert!(run.speedup() > 1.2);
    }

    #[tokio::test]
    async fn test_fast_member_is_recorded_before_slow_one_finishes() {
        let dir = tempdir().unwrap();
        let (coordinator, audit) = coordinator(&dir);
        let phases = vec![
            Phase::shell("slow", "sleep 1").in_group("g"),
            Phase::shell("fast", "true").in_group("g"),
        ];

        let run = coordinator.run_group("g", &phases).await.unwrap();

        assert_eq!(run.records[0].phase, "fast");
        let entries = audit.entries().unwrap();
        let order: Vec<(&str, Option<PhaseStatus>)> = entries
            .iter()
            .map(|e| (e.phase.as_str(), e.status))
            .collect();
        assert_eq!(
            order,
            vec![
                ("slow", Some(PhaseStatus::Started)),
                ("fast", Some(PhaseStatus::Started)),
                ("fast", Some(PhaseStatus::Succeeded)),
                ("slow", Some(PhaseStatus::Succeeded)),
            ]
        );
    }

    #[tokio::test]
    async fn test_exit_codes_stay_with_their_member_under_reverse_finish_order() {
        let dir = tempdir().unwrap();
        let (coordinator, audit) = coordinator(&dir);
        let phases = vec![
            Phase::shell("first", "sleep 0.4; exit 3").in_group("g"),
            Phase::shell("second", "sleep 0.2; exit 5").in_group("g"),
            Phase::shell("third", "exit 7").in_group("g"),
        ];

        let run = coordinator.run_group("g", &phases).await.unwrap();

        let finished: Vec<(&str, Option<i32>)> = run
            .records
            .iter()
            .map(|r| (r.phase.as_str(), r.exit_code))
            .collect();
        assert_eq!(
            finished,
            vec![("third", Some(7)), ("second", Some(5)), ("first", Some(3))]
        );
        for (phase, code) in [("first", 3), ("second", 5), ("third", 7)] {
            let entry = audit.most_recent(phase).unwrap().unwrap();
            assert_eq!(entry.status, Some(PhaseStatus::Failed), "{phase}");
            assert_eq!(entry.exit_code, Some(code), "{phase}");
            assert!(entry.log.unwrap().ends_with(format!("{phase}-1.log")));
        }
    }

    #[tokio::test]
    async fn test_one_failing_member_fails_the_group_but_others_finish() {
        let dir = tempdir().unwrap();
        let (coordinator, audit) = coordinator(&dir);
        let phases = vec![
            Phase::shell("ok-1", "true").in_group("g"),
            Phase::shell("bad", "exit 7").in_group("g"),
            Phase::shell("ok-2", "sleep 0.2").in_group("g"),
        ];

        let run = coordinator.run_group("g", &phases).await.unwrap();

        assert_eq!(run.status(), PhaseStatus::Failed);
        let failed: Vec<&str> = run.failed().map(|r| r.phase.as_str()).collect();
        assert_eq!(failed, vec!["bad"]);
        assert_eq!(
            audit.most_recent_status("ok-2").unwrap(),
            Some(PhaseStatus::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_member_timeout_does_not_affect_siblings() {
        let dir = tempdir().unwrap();
        let (coordinator, _) = coordinator(&dir);
        let phases = vec![
            Phase::shell("hang", "sleep 10")
                .in_group("g")
                .with_timeout(Duration::from_millis(300)),
            Phase::shell("quick", "true").in_group("g"),
        ];

        let run = coordinator.run_group("g", &phases).await.unwrap();

        let hang = run.records.iter().find(|r| r.phase == "hang").unwrap();
        let quick = run.records.iter().find(|r| r.phase == "quick").unwrap();
        assert_eq!(hang.status, PhaseStatus::TimedOut);
        assert_eq!(quick.status, PhaseStatus::Succeeded);
    }
}
