use super::{AuditEntry, PhaseStatus};
use crate::errors::OrchestratorError;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Append-only JSON-lines audit log for one workflow.
///
/// Each entry is serialized to a single buffer and written with one
/// `write_all` on a file opened in append mode, so concurrent writers never
/// interleave partial lines. Appends and reads take `&self`; share the log as
/// `Arc<AuditLog>`.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    run_id: Uuid,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run_id: Uuid::new_v4(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifier stamped on every entry written through this handle.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Durably append one entry.
    pub fn append(&self, mut entry: AuditEntry) -> Result<(), OrchestratorError> {
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id);
        }

        let mut line = serde_json::to_string(&entry)
            .context("Failed to serialize audit entry")
            .map_err(OrchestratorError::Other)?;
        line.push('\n');

        let write_failed = |source| OrchestratorError::AuditWriteFailed {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(write_failed)?;

        debug!(
            phase = %entry.phase,
            status = ?entry.status,
            event = ?entry.event,
            "audit entry appended"
        );
        Ok(())
    }

    /// Read every well-formed entry in file order.
    ///
    /// Malformed lines are skipped with a warning. A trailing line without a
    /// newline is an append still in flight and is ignored.
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let bytes = fs::read(&self.path)
            .with_context(|| format!("Failed to read audit log: {}", self.path.display()))?;
        let content = String::from_utf8_lossy(&bytes);

        let mut entries = Vec::new();
        for (index, line) in content.split_inclusive('\n').enumerate() {
            if !line.ends_with('\n') {
                debug!(line = index + 1, "ignoring partial trailing audit line");
                continue;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "skipping malformed audit line"
                ),
            }
        }
        Ok(entries)
    }

    /// Most recent lifecycle entry for a phase.
    pub fn most_recent(&self, phase: &str) -> Result<Option<AuditEntry>> {
        let entries = self.entries()?;
        Ok(latest_lifecycle(&entries).remove(phase).cloned())
    }

    /// Most recent lifecycle status for a phase; `None` when it never ran.
    pub fn most_recent_status(&self, phase: &str) -> Result<Option<PhaseStatus>> {
        Ok(self.most_recent(phase)?.and_then(|entry| entry.status))
    }

    /// Duration of the most recent terminal attempt of a phase.
    pub fn duration(&self, phase: &str) -> Result<Option<Duration>> {
        let entries = self.entries()?;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.phase == phase)
            .find(|e| e.status.is_some_and(|s| s.is_terminal()))
            .and_then(AuditEntry::duration))
    }

    /// Which of `expected` have run, and which did not end in success.
    pub fn coverage<S: AsRef<str>>(&self, expected: &[S]) -> Result<Coverage> {
        let entries = self.entries()?;
        Ok(Coverage::from_entries(expected, &entries))
    }

    /// Phases whose most recent lifecycle record is `succeeded`.
    pub fn succeeded_phases(&self) -> Result<HashSet<String>> {
        let entries = self.entries()?;
        Ok(latest_lifecycle(&entries)
            .into_iter()
            .filter(|(_, entry)| entry.status == Some(PhaseStatus::Succeeded))
            .map(|(phase, _)| phase.to_string())
            .collect())
    }

    /// Number of `started` records per phase, used to number new attempts.
    pub fn attempt_counts(&self) -> Result<HashMap<String, u32>> {
        let mut counts = HashMap::new();
        for entry in self.entries()? {
            if entry.status == Some(PhaseStatus::Started) {
                *counts.entry(entry.phase).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

/// Latest lifecycle entry per phase; event entries are ignored.
pub fn latest_lifecycle(entries: &[AuditEntry]) -> HashMap<&str, &AuditEntry> {
    let mut latest = HashMap::new();
    for entry in entries.iter().filter(|e| e.is_lifecycle()) {
        latest.insert(entry.phase.as_str(), entry);
    }
    latest
}

/// Coverage of a set of expected phases.
///
/// `missing` and `failed_names` are both empty exactly when every expected
/// phase's most recent record is `succeeded`. `incomplete` lists the subset of
/// `failed_names` whose most recent record is `started` (a crash mid-phase).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub found: Vec<String>,
    pub missing: Vec<String>,
    pub failed_names: Vec<String>,
    pub incomplete: Vec<String>,
}

impl Coverage {
    pub fn from_entries<S: AsRef<str>>(expected: &[S], entries: &[AuditEntry]) -> Self {
        let latest = latest_lifecycle(entries);
        let mut coverage = Coverage::default();

        for name in expected.iter().map(AsRef::as_ref) {
            match latest.get(name).and_then(|e| e.status) {
                None => coverage.missing.push(name.to_string()),
                Some(status) => {
                    coverage.found.push(name.to_string());
                    if !status.is_success() {
                        coverage.failed_names.push(name.to_string());
                    }
                    if status == PhaseStatus::Started {
                        coverage.incomplete.push(name.to_string());
                    }
                }
            }
        }
        coverage
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.failed_names.is_empty()
    }
}
