//! Audit trail data model.
//!
//! Every phase lifecycle transition and every notable orchestration event is
//! appended to a per-workflow JSON-lines file. The most recent lifecycle
//! record per phase is authoritative for resume, dependency checks and
//! reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

pub mod log;

/// Names of non-lifecycle audit events.
pub mod events {
    pub const BLOCKED: &str = "blocked";
    pub const SKIPPED: &str = "skipped";
    pub const RESUMED: &str = "resumed";
    pub const OPERATOR_DECISION: &str = "operator_decision";
    pub const VALIDATION_ATTEMPT: &str = "validation_attempt";
    pub const QUALITY_SCORE: &str = "quality_score";
    pub const QUALITY_DECISION: &str = "quality_decision";
    pub const RUN_FINISHED: &str = "run_finished";
}

pub use log::{AuditLog, Coverage, latest_lifecycle};

/// Lifecycle status of a phase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Started,
    Succeeded,
    Failed,
    TimedOut,
    Killed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Started => "started",
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Failed => "failed",
            PhaseStatus::TimedOut => "timed_out",
            PhaseStatus::Killed => "killed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PhaseStatus::Started)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PhaseStatus::Succeeded)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the audit log.
///
/// Lifecycle entries carry `status`; event entries (blocked, skipped,
/// validation attempts, operator decisions) carry `event` instead and never
/// affect a phase's most recent status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PhaseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl AuditEntry {
    fn blank(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            status: None,
            exit_code: None,
            duration_sec: None,
            duration_ms: None,
            timestamp: Utc::now(),
            event: None,
            detail: None,
            attempt: None,
            group: None,
            log: None,
            run_id: None,
        }
    }

    /// The record written the moment a worker process has been spawned.
    pub fn started(phase: &str, attempt: u32, group: Option<&str>, log: &Path) -> Self {
        Self {
            status: Some(PhaseStatus::Started),
            attempt: Some(attempt),
            group: group.map(str::to_string),
            log: Some(log.to_path_buf()),
            ..Self::blank(phase)
        }
    }

    /// The terminal record for a finished attempt.
    pub fn terminal(record: &ExecutionRecord) -> Self {
        Self {
            status: Some(record.status),
            exit_code: record.exit_code,
            duration_sec: Some(record.duration.as_secs()),
            duration_ms: Some(record.duration.as_millis() as u64),
            timestamp: record.finished_at,
            detail: record.error.clone(),
            attempt: Some(record.attempt),
            group: record.group.clone(),
            log: Some(record.log_path.clone()),
            ..Self::blank(&record.phase)
        }
    }

    /// A non-lifecycle event about `subject` (a phase, group or validation level).
    pub fn event(subject: &str, event: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            event: Some(event.to_string()),
            detail: (!detail.is_empty()).then_some(detail),
            ..Self::blank(subject)
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_log(mut self, log: &Path) -> Self {
        self.log = Some(log.to_path_buf());
        self
    }

    pub fn is_lifecycle(&self) -> bool {
        self.status.is_some()
    }

    /// Duration with millisecond precision when available.
    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms
            .map(Duration::from_millis)
            .or_else(|| self.duration_sec.map(Duration::from_secs))
    }
}

/// Outcome of one finished phase attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub phase: String,
    pub status: PhaseStatus,
    pub exit_code: Option<i32>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub log_path: PathBuf,
    /// Set when the worker could not be launched at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> bool {
        self.status.is_success()
    }

    /// Read the combined stdout/stderr captured for this attempt.
    ///
    /// A missing log (the worker never started) reads as empty output.
    pub fn read_output(&self) -> String {
        match std::fs::read(&self.log_path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: PhaseStatus, exit_code: Option<i32>) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            phase: "build".into(),
            status,
            exit_code,
            duration: Duration::from_millis(2500),
            started_at: now,
            finished_at: now,
            attempt: 1,
            group: None,
            log_path: PathBuf::from("logs/build-1.log"),
            error: None,
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&PhaseStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        let parsed: PhaseStatus = serde_json::from_str("\"killed\"").unwrap();
        assert_eq!(parsed, PhaseStatus::Killed);
        assert_eq!(PhaseStatus::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn test_status_predicates() {
        assert!(!PhaseStatus::Started.is_terminal());
        assert!(PhaseStatus::Killed.is_terminal());
        assert!(PhaseStatus::Succeeded.is_success());
        assert!(!PhaseStatus::TimedOut.is_success());
    }

    #[test]
    fn test_terminal_entry_carries_record_fields() {
        let entry = AuditEntry::terminal(&record(PhaseStatus::Failed, Some(2)));

        assert_eq!(entry.phase, "build");
        assert_eq!(entry.status, Some(PhaseStatus::Failed));
        assert_eq!(entry.exit_code, Some(2));
        assert_eq!(entry.duration_sec, Some(2));
        assert_eq!(entry.duration(), Some(Duration::from_millis(2500)));
        assert!(entry.is_lifecycle());
    }

    #[test]
    fn test_event_entry_is_not_lifecycle() {
        let entry = AuditEntry::event("deploy", "blocked", "dependency build is failed");
        assert!(!entry.is_lifecycle());
        assert_eq!(entry.event.as_deref(), Some("blocked"));

        let bare = AuditEntry::event("deploy", "resumed", "");
        assert!(bare.detail.is_none());
    }

    #[test]
    fn test_entry_line_format_omits_empty_fields() {
        let entry = AuditEntry::event("lint", "skipped", "");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["phase"], "lint");
        assert!(json.get("status").is_none());
        assert!(json.get("exit_code").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_read_output_of_missing_log_is_empty() {
        let rec = record(PhaseStatus::Failed, None);
        assert_eq!(rec.read_output(), "");
    }
}
