//! Operator-facing report.
//!
//! Built purely from audit-log queries, so a resumed run reports the same as
//! one continuous run. Rendered to the console with `console` styling or
//! written as `report.json` next to the audit log.
//!
//! The `describe_*` helpers produce the text shown at every decision point:
//! what failed, its status or error class, where its log is, and which
//! choices exist.

use crate::audit::{AuditEntry, Coverage, PhaseStatus, events, latest_lifecycle};
use crate::quality::QualityEscalation;
use crate::runner::{BlockedPhase, PhaseFailure};
use crate::ui::icons::{BLOCKER, CHECK, CLOCK, CROSS, GROUP, KILLED, REVIEW, SKIP, SPARKLE};
use crate::validation::LevelExhausted;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseLine {
    pub name: String,
    pub status: Option<PhaseStatus>,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub attempts: u32,
    pub group: Option<String>,
    pub log: Option<PathBuf>,
    pub blocked: bool,
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTiming {
    pub group: String,
    pub members: usize,
    /// Sum of member durations
    pub sequential_ms: u64,
    /// First member start to last member finish
    pub parallel_ms: u64,
    pub speedup: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelLine {
    pub level: String,
    pub attempts: u32,
    pub passed: bool,
    pub last: Option<String>,
    pub decision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityLine {
    pub phase: String,
    pub attempts: u32,
    pub score: Option<String>,
    pub decision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowReport {
    pub workflow: String,
    pub generated_at: DateTime<Utc>,
    pub phases: Vec<PhaseLine>,
    pub coverage: Coverage,
    pub groups: Vec<GroupTiming>,
    pub validation: Vec<LevelLine>,
    pub quality: Option<QualityLine>,
    pub outcome: Option<String>,
}

impl WorkflowReport {
    /// Build the report for `expected` phases from the audit entries.
    pub fn from_entries<S: AsRef<str>>(
        workflow: &str,
        expected: &[S],
        entries: &[AuditEntry],
    ) -> Self {
        let latest = latest_lifecycle(entries);
        let mut attempts: HashMap<&str, u32> = HashMap::new();
        // (blocked, skipped) since the phase's last lifecycle entry
        let mut flags: HashMap<&str, (bool, bool)> = HashMap::new();
        for entry in entries {
            match (entry.status, entry.event.as_deref()) {
                (Some(status), _) => {
                    if status == PhaseStatus::Started {
                        *attempts.entry(entry.phase.as_str()).or_insert(0) += 1;
                    }
                    flags.insert(entry.phase.as_str(), (false, false));
                }
                (None, Some(events::BLOCKED)) => {
                    flags.entry(entry.phase.as_str()).or_default().0 = true;
                }
                (None, Some(events::SKIPPED)) => {
                    flags.entry(entry.phase.as_str()).or_default().1 = true;
                }
                _ => {}
            }
        }

        let phases = expected
            .iter()
            .map(AsRef::as_ref)
            .map(|name| {
                let entry = latest.get(name);
                let (blocked, skipped) = flags.get(name).copied().unwrap_or_default();
                PhaseLine {
                    name: name.to_string(),
                    status: entry.and_then(|e| e.status),
                    exit_code: entry.and_then(|e| e.exit_code),
                    duration_ms: entry
                        .and_then(|e| e.duration())
                        .map(|d| d.as_millis() as u64),
                    attempts: attempts.get(name).copied().unwrap_or(0),
                    group: entry.and_then(|e| e.group.clone()),
                    log: entry.and_then(|e| e.log.clone()),
                    blocked,
                    skipped,
                }
            })
            .collect();

        Self {
            workflow: workflow.to_string(),
            generated_at: Utc::now(),
            phases,
            coverage: Coverage::from_entries(expected, entries),
            groups: group_timings(entries),
            validation: level_lines(entries),
            quality: quality_line(entries),
            outcome: entries
                .iter()
                .rev()
                .find(|e| e.event.as_deref() == Some(events::RUN_FINISHED))
                .and_then(|e| e.detail.clone()),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}{} {}",
            SPARKLE,
            style("Workflow report:").bold(),
            style(&self.workflow).cyan().bold()
        );

        let width = self.phases.iter().map(|p| p.name.len()).max().unwrap_or(0);
        for line in &self.phases {
            let icon = match (line.status, line.skipped, line.blocked) {
                (_, true, _) => SKIP.to_string(),
                (None, _, true) => BLOCKER.to_string(),
                (Some(PhaseStatus::Succeeded), ..) => CHECK.to_string(),
                (Some(PhaseStatus::TimedOut), ..) => CLOCK.to_string(),
                (Some(PhaseStatus::Killed), ..) => KILLED.to_string(),
                (Some(_), ..) => CROSS.to_string(),
                (None, ..) => "   ".to_string(),
            };
            let status = match line.status {
                Some(status) => status.to_string(),
                None if line.blocked => "blocked".to_string(),
                None => "not run".to_string(),
            };
            let _ = write!(out, "  {icon}{:<width$}  {:<10}", line.name, status);
            if let Some(ms) = line.duration_ms {
                let _ = write!(out, " {:>8}", format_secs(Duration::from_millis(ms)));
            }
            if let Some(code) = line.exit_code
                && code != 0
            {
                let _ = write!(out, "  exit {code}");
            }
            if line.attempts > 1 {
                let _ = write!(out, "  attempts {}", line.attempts);
            }
            if line.skipped {
                let _ = write!(out, "  {}", style("skipped").dim());
            }
            if let Some(log) = &line.log
                && line.status.is_some_and(|s| !s.is_success())
            {
                let _ = write!(out, "  log: {}", style(log.display()).dim());
            }
            out.push('\n');
        }

        if !self.groups.is_empty() {
            let _ = writeln!(out, "\n{}{}", GROUP, style("Groups").bold());
            for group in &self.groups {
                let _ = writeln!(
                    out,
                    "  {}: {} members, sequential {}, parallel {}, speed-up {:.1}x",
                    style(&group.group).cyan(),
                    group.members,
                    format_secs(Duration::from_millis(group.sequential_ms)),
                    format_secs(Duration::from_millis(group.parallel_ms)),
                    group.speedup
                );
            }
        }

        if !self.validation.is_empty() {
            let _ = writeln!(out, "\n{}", style("Validation").bold());
            for level in &self.validation {
                let verdict = if level.passed {
                    style("passed").green()
                } else {
                    style("not passed").red()
                };
                let _ = write!(
                    out,
                    "  {}: {} after {} attempt{}",
                    level.level,
                    verdict,
                    level.attempts,
                    if level.attempts == 1 { "" } else { "s" }
                );
                if let Some(decision) = &level.decision {
                    let _ = write!(out, " ({decision})");
                }
                out.push('\n');
            }
        }

        if let Some(quality) = &self.quality {
            let _ = writeln!(
                out,
                "\n{}{} {}: {} after {} attempt{}{}",
                REVIEW,
                style("Quality").bold(),
                quality.phase,
                quality.score.as_deref().unwrap_or("no score"),
                quality.attempts,
                if quality.attempts == 1 { "" } else { "s" },
                quality
                    .decision
                    .as_deref()
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default()
            );
        }

        let total = self.phases.len();
        let succeeded = total - self.coverage.missing.len() - self.coverage.failed_names.len();
        let _ = writeln!(out, "\nCoverage: {succeeded}/{total} succeeded");
        for (label, names) in [
            ("missing", &self.coverage.missing),
            ("failed", &self.coverage.failed_names),
            ("incomplete", &self.coverage.incomplete),
        ] {
            if !names.is_empty() {
                let _ = writeln!(out, "  {label}: {}", names.join(", "));
            }
        }
        if let Some(outcome) = &self.outcome {
            let _ = writeln!(out, "Outcome: {}", style(outcome).bold());
        }
        out
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }
}

fn format_secs(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

/// Timings of each group's most recent attempt per member.
fn group_timings(entries: &[AuditEntry]) -> Vec<GroupTiming> {
    // group -> member -> (latest start, latest terminal)
    let mut groups: BTreeMap<&str, BTreeMap<&str, (Option<&AuditEntry>, Option<&AuditEntry>)>> =
        BTreeMap::new();
    for entry in entries {
        let (Some(group), Some(status)) = (entry.group.as_deref(), entry.status) else {
            continue;
        };
        let slot = groups
            .entry(group)
            .or_default()
            .entry(entry.phase.as_str())
            .or_default();
        if status == PhaseStatus::Started {
            *slot = (Some(entry), None);
        } else {
            slot.1 = Some(entry);
        }
    }

    groups
        .into_iter()
        .filter_map(|(group, members)| {
            let finished: Vec<_> = members
                .values()
                .filter_map(|(start, end)| Some(((*start)?, (*end)?)))
                .collect();
            let first_start = finished.iter().map(|(s, _)| s.timestamp).min()?;
            let last_end = finished.iter().map(|(_, e)| e.timestamp).max()?;
            let sequential: Duration = finished.iter().filter_map(|(_, e)| e.duration()).sum();
            let parallel = (last_end - first_start).to_std().unwrap_or_default();
            let speedup = if parallel.is_zero() {
                1.0
            } else {
                sequential.as_secs_f64() / parallel.as_secs_f64()
            };
            Some(GroupTiming {
                group: group.to_string(),
                members: members.len(),
                sequential_ms: sequential.as_millis() as u64,
                parallel_ms: parallel.as_millis() as u64,
                speedup,
            })
        })
        .collect()
}

fn level_lines(entries: &[AuditEntry]) -> Vec<LevelLine> {
    let mut lines: Vec<LevelLine> = Vec::new();
    for entry in entries {
        let Some(level) = entry.phase.strip_prefix("validate:") else {
            continue;
        };
        let index = match lines.iter().position(|l| l.level == level) {
            Some(index) => index,
            None => {
                lines.push(LevelLine {
                    level: level.to_string(),
                    attempts: 0,
                    passed: false,
                    last: None,
                    decision: None,
                });
                lines.len() - 1
            }
        };
        let line = &mut lines[index];
        match entry.event.as_deref() {
            Some(events::VALIDATION_ATTEMPT) => {
                line.attempts += 1;
                line.passed = entry.detail.as_deref() == Some("passed");
                line.last = entry.detail.clone();
            }
            Some(events::OPERATOR_DECISION) => line.decision = entry.detail.clone(),
            _ => {}
        }
    }
    lines
}

fn quality_line(entries: &[AuditEntry]) -> Option<QualityLine> {
    let mut line: Option<QualityLine> = None;
    for entry in entries {
        match entry.event.as_deref() {
            Some(events::QUALITY_SCORE) => {
                let current = line.get_or_insert_with(|| QualityLine {
                    phase: entry.phase.clone(),
                    attempts: 0,
                    score: None,
                    decision: None,
                });
                current.attempts += 1;
                current.score = entry.detail.clone();
            }
            Some(events::QUALITY_DECISION) => {
                if let Some(current) = line.as_mut() {
                    current.decision = entry.detail.clone();
                }
            }
            _ => {}
        }
    }
    line
}

fn choices(options: &[&str]) -> String {
    format!("  {} {}", style("Choices:").bold(), options.join(" | "))
}

pub fn describe_phase_failure(failure: &PhaseFailure) -> String {
    let mut out = String::new();
    let what = match &failure.group {
        Some(group) => format!("Group {group}"),
        None => format!("Phase {}", failure.step),
    };
    let _ = writeln!(out, "{}{} did not succeed", CROSS, style(what).red().bold());
    for record in &failure.failed {
        let status = match (record.status, record.exit_code) {
            (PhaseStatus::Failed, Some(code)) => format!("failed (exit code {code})"),
            (status, Some(code)) => format!("{status} (exit code {code})"),
            (status, None) => status.to_string(),
        };
        let _ = writeln!(out, "  {}: {}", record.phase, status);
        if let Some(error) = &record.error {
            let _ = writeln!(out, "    {error}");
        }
        let _ = writeln!(out, "    log: {}", record.log_path.display());
    }
    let _ = writeln!(
        out,
        "  Retries used: {}, remaining: {}",
        failure.retries_used, failure.retries_remaining
    );
    let options: &[&str] = if failure.retries_remaining > 0 {
        &["retry", "retry with increased timeout", "skip", "abort"]
    } else {
        &["skip", "abort"]
    };
    out.push_str(&choices(options));
    out
}

pub fn describe_blocked(blocked: &BlockedPhase) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}{}",
        BLOCKER,
        style(blocked.to_error().to_string()).yellow().bold()
    );
    let _ = writeln!(out, "  Not launched: {}", blocked.phases.join(", "));
    if let Some(log) = &blocked.dependency_log {
        let _ = writeln!(out, "  {} log: {}", blocked.dependency, log.display());
    }
    out.push_str(&choices(&["skip", "abort"]));
    out
}

pub fn describe_exhausted(exhausted: &LevelExhausted) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}Validation level {} exhausted after {} attempts",
        CROSS,
        style(&exhausted.level).red().bold(),
        exhausted.attempts
    );
    if let Some(last) = &exhausted.last {
        let _ = write!(out, "  Last attempt: {}", last.status);
        if let Some(code) = last.exit_code {
            let _ = write!(out, " (exit code {code})");
        }
        if let Some(class) = &last.error_class {
            let _ = write!(out, ", class {class}");
        }
        out.push('\n');
        let _ = writeln!(out, "  log: {}", last.log.display());
    }
    let options: &[&str] = if exhausted.can_pause {
        &["accept partial", "pause for manual fix", "abort"]
    } else {
        &["accept partial", "abort"]
    };
    out.push_str(&choices(options));
    out
}

pub fn describe_quality(escalation: &QualityEscalation) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}Quality gate for {}: {} after {} attempts",
        REVIEW,
        style(&escalation.phase).red().bold(),
        escalation.shortfall,
        escalation.attempts
    );
    let _ = writeln!(out, "  Minimum score: {}", escalation.minimum);
    if let Some(log) = &escalation.log {
        let _ = writeln!(out, "  log: {}", log.display());
    }
    out.push_str(&choices(&["accept anyway", "abort"]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ExecutionRecord;
    use crate::quality::Shortfall;
    use crate::validation::{ErrorClass, ValidationAttempt};

    fn record(phase: &str, status: PhaseStatus, group: Option<&str>, ms: u64) -> ExecutionRecord {
        let finished_at = Utc::now();
        ExecutionRecord {
            phase: phase.into(),
            status,
            exit_code: Some(if status.is_success() { 0 } else { 1 }),
            duration: Duration::from_millis(ms),
            started_at: finished_at - chrono::Duration::milliseconds(ms as i64),
            finished_at,
            attempt: 1,
            group: group.map(str::to_string),
            log_path: PathBuf::from(format!("logs/{phase}-1.log")),
            error: None,
        }
    }

    fn run(entries: &mut Vec<AuditEntry>, record: &ExecutionRecord) {
        let mut started = AuditEntry::started(
            &record.phase,
            record.attempt,
            record.group.as_deref(),
            &record.log_path,
        );
        started.timestamp = record.started_at;
        entries.push(started);
        entries.push(AuditEntry::terminal(record));
    }

    #[test]
    fn test_report_lines_follow_latest_records() {
        let mut entries = Vec::new();
        run(&mut entries, &record("plan", PhaseStatus::Failed, None, 100));
        run(&mut entries, &record("plan", PhaseStatus::Succeeded, None, 200));
        entries.push(AuditEntry::event("deploy", events::BLOCKED, "dependency"));
        entries.push(AuditEntry::event(
            "wf",
            events::RUN_FINISHED,
            "aborted at deploy",
        ));

        let report = WorkflowReport::from_entries("wf", &["plan", "deploy"], &entries);

        assert_eq!(report.phases[0].status, Some(PhaseStatus::Succeeded));
        assert_eq!(report.phases[0].attempts, 2);
        assert_eq!(report.phases[0].duration_ms, Some(200));
        assert!(report.phases[1].blocked);
        assert_eq!(report.coverage.missing, vec!["deploy".to_string()]);
        assert_eq!(report.outcome.as_deref(), Some("aborted at deploy"));

        let text = report.render();
        assert!(text.contains("plan"));
        assert!(text.contains("blocked"));
        assert!(text.contains("aborted at deploy"));
    }

    #[test]
    fn test_group_timing_uses_wall_clock_span() {
        let mut entries = Vec::new();
        for name in ["a", "b", "c"] {
            run(&mut entries, &record(name, PhaseStatus::Succeeded, Some("g"), 1000));
        }

        let report = WorkflowReport::from_entries("wf", &["a", "b", "c"], &entries);

        let group = &report.groups[0];
        assert_eq!(group.members, 3);
        assert_eq!(group.sequential_ms, 3000);
        assert!(group.parallel_ms < 3000);
        assert!(group.speedup > 1.0);
    }

    #[test]
    fn test_validation_and_quality_lines() {
        let entries = vec![
            AuditEntry::event("validate:style", events::VALIDATION_ATTEMPT, "failed: type_error"),
            AuditEntry::event("validate:style", events::VALIDATION_ATTEMPT, "passed"),
            AuditEntry::event("validate:tests", events::VALIDATION_ATTEMPT, "failed: unclassified"),
            AuditEntry::event("validate:tests", events::OPERATOR_DECISION, "accept_partial"),
            AuditEntry::event("review", events::QUALITY_SCORE, "6/10"),
            AuditEntry::event("review", events::QUALITY_SCORE, "9/10"),
            AuditEntry::event("review", events::QUALITY_DECISION, "accept"),
        ];

        let report = WorkflowReport::from_entries::<&str>("wf", &[], &entries);

        assert_eq!(report.validation.len(), 2);
        assert!(report.validation[0].passed);
        assert_eq!(report.validation[0].attempts, 2);
        assert!(!report.validation[1].passed);
        assert_eq!(report.validation[1].decision.as_deref(), Some("accept_partial"));
        let quality = report.quality.unwrap();
        assert_eq!(quality.attempts, 2);
        assert_eq!(quality.score.as_deref(), Some("9/10"));
        assert_eq!(quality.decision.as_deref(), Some("accept"));
    }

    #[test]
    fn test_skip_after_failure_is_cleared_by_later_success() {
        let mut entries = Vec::new();
        run(&mut entries, &record("lint", PhaseStatus::Failed, None, 10));
        entries.push(AuditEntry::event("lint", events::SKIPPED, "left failed"));
        let skipped = WorkflowReport::from_entries("wf", &["lint"], &entries);
        assert!(skipped.phases[0].skipped);

        run(&mut entries, &record("lint", PhaseStatus::Succeeded, None, 10));
        let resumed = WorkflowReport::from_entries("wf", &["lint"], &entries);
        assert!(!resumed.phases[0].skipped);
        assert!(resumed.coverage.is_complete());
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = WorkflowReport::from_entries::<&str>("wf", &[], &[]);
        report.write_json(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["workflow"], "wf");
    }

    #[test]
    fn test_describe_failure_names_status_log_and_choices() {
        let failure = PhaseFailure {
            step: "impl".into(),
            group: Some("impl".into()),
            failed: vec![record("impl-api", PhaseStatus::TimedOut, Some("impl"), 50)],
            retries_used: 2,
            retries_remaining: 0,
        };
        let text = describe_phase_failure(&failure);
        assert!(text.contains("impl-api"));
        assert!(text.contains("timed_out"));
        assert!(text.contains("logs/impl-api-1.log"));
        assert!(text.contains("skip | abort"));
        assert!(!text.contains("retry with increased timeout"));
    }

    #[test]
    fn test_describe_blocked_and_exhausted_and_quality() {
        let blocked = BlockedPhase {
            step: "deploy".into(),
            group: None,
            phases: vec!["deploy".into()],
            dependency: "build".into(),
            dependency_status: Some(PhaseStatus::Killed),
            dependency_log: Some(PathBuf::from("logs/build-3.log")),
        };
        let text = describe_blocked(&blocked);
        assert!(text.contains("dependency build is killed"));
        assert!(text.contains("logs/build-3.log"));

        let exhausted = LevelExhausted {
            level: "types".into(),
            attempts: 3,
            last: Some(ValidationAttempt {
                level: "types".into(),
                attempt: 3,
                passed: false,
                status: PhaseStatus::Failed,
                exit_code: Some(2),
                error_class: Some(ErrorClass::TypeError),
                remedy: None,
                log: PathBuf::from("logs/validate_types-3.log"),
                duration_ms: 5,
            }),
            can_pause: true,
        };
        let text = describe_exhausted(&exhausted);
        assert!(text.contains("class type_error"));
        assert!(text.contains("pause for manual fix"));

        let escalation = QualityEscalation {
            phase: "review".into(),
            shortfall: Shortfall::NotFound,
            attempts: 3,
            minimum: 8.0,
            log: None,
        };
        let text = describe_quality(&escalation);
        assert!(text.contains("no score found"));
        assert!(text.contains("accept anyway | abort"));
    }
}
