use crate::audit::{ExecutionRecord, PhaseStatus};
use crate::ui::icons::{BLOCKER, CHECK, CLOCK, CROSS, GROUP, KILLED, RESUMED, RUNNING, SKIP};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Terminal progress for one workflow run, rendered via `indicatif`.
///
/// A header bar counts finished phases; each running phase gets its own
/// spinner so the members of a parallel group are visible side by side.
/// [`RunProgress::hidden`] draws nothing and is used for non-interactive runs
/// and tests.
pub struct RunProgress {
    multi: MultiProgress,
    header: ProgressBar,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl RunProgress {
    pub fn new(total_phases: u64) -> Self {
        Self::with_target(total_phases, ProgressDrawTarget::stderr())
    }

    pub fn hidden() -> Self {
        Self::with_target(0, ProgressDrawTarget::hidden())
    }

    fn with_target(total_phases: u64, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let header_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let header = multi.add(ProgressBar::new(total_phases));
        header.set_style(header_style);
        header.set_prefix("Phases");

        Self {
            multi,
            header,
            bars: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_total(&self, total_phases: u64) {
        self.header.set_length(total_phases);
    }

    /// Account for retried attempts.
    pub fn extend_total(&self, extra: u64) {
        self.header.inc_length(extra);
    }

    /// Print above the bars, falling back to stderr if the draw target is gone.
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.header.is_hidden() {
            return;
        }
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn group_started(&self, group: &str, members: usize) {
        self.println(format!(
            "{}Group {} ({} members in parallel)",
            GROUP,
            style(group).cyan().bold(),
            members
        ));
    }

    pub fn phase_started(&self, phase: &str, group: Option<&str>) {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix(match group {
            Some(group) => format!("  {group}"),
            None => "  ".to_string(),
        });
        bar.set_message(format!("{}{}", RUNNING, style(phase).yellow()));
        bar.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut bars) = self.bars.lock()
            && let Some(previous) = bars.insert(phase.to_string(), bar)
        {
            previous.finish_and_clear();
        }
    }

    pub fn phase_finished(&self, record: &ExecutionRecord) {
        let bar = self.bars.lock().ok().and_then(|mut bars| bars.remove(&record.phase));
        if let Some(bar) = bar {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        self.header.inc(1);

        let secs = record.duration.as_secs_f64();
        let line = match record.status {
            PhaseStatus::Succeeded => format!(
                "{}{} {}",
                CHECK,
                style(&record.phase).green(),
                style(format!("({secs:.1}s)")).dim()
            ),
            PhaseStatus::TimedOut => format!(
                "{}{} timed out after {secs:.1}s",
                CLOCK,
                style(&record.phase).red()
            ),
            PhaseStatus::Killed => format!("{}{} killed", KILLED, style(&record.phase).red()),
            PhaseStatus::Failed | PhaseStatus::Started => format!(
                "{}{} failed{}",
                CROSS,
                style(&record.phase).red(),
                record
                    .exit_code
                    .map(|code| format!(" (exit code {code})"))
                    .unwrap_or_default()
            ),
        };
        self.println(line);
    }

    pub fn phase_blocked(&self, phase: &str, dependency: &str) {
        self.println(format!(
            "{}{} blocked by {}",
            BLOCKER,
            style(phase).yellow(),
            style(dependency).bold()
        ));
    }

    pub fn phase_skipped(&self, phase: &str) {
        self.header.inc(1);
        self.println(format!("{}{} skipped", SKIP, style(phase).dim()));
    }

    /// A finished phase the operator chose not to retry.
    pub fn phase_left_failed(&self, phase: &str) {
        self.println(format!(
            "{}{} skipped after failure",
            SKIP,
            style(phase).dim()
        ));
    }

    pub fn phase_resumed(&self, phase: &str) {
        self.header.inc(1);
        self.println(format!(
            "{}{} already succeeded",
            RESUMED,
            style(phase).dim()
        ));
    }

    pub fn finish(&self) {
        if let Ok(mut bars) = self.bars.lock() {
            for (_, bar) in bars.drain() {
                bar.finish_and_clear();
            }
        }
        self.header.finish_and_clear();
    }
}
