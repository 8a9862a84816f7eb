//! Process executor.
//!
//! Launches one phase attempt as an OS process, captures its combined
//! output in a per-attempt log file, enforces the phase timeout and records
//! both lifecycle transitions in the audit log the moment they happen.
//!
//! Launching and waiting are split ([`ProcessExecutor::launch`] and
//! [`RunningPhase::finish`]) so a group coordinator can start every member
//! before waiting on any of them.

use crate::audit::{AuditEntry, AuditLog, ExecutionRecord, PhaseStatus};
use crate::errors::PhaseError;
use crate::phase::Phase;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Exit code recorded when a timed-out worker stopped after SIGTERM.
pub const TIMED_OUT_EXIT_CODE: i32 = 128 + 15;
/// Exit code recorded when a worker had to be force-killed.
pub const KILLED_EXIT_CODE: i32 = 128 + 9;

/// How the agent binary is invoked for phases without a `run` line.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub program: String,
    /// Arguments; a literal `{profile}` is replaced with the phase profile
    pub args: Vec<String>,
    pub profile: String,
}

impl Default for AgentInvocation {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["--print".to_string()],
            profile: "default".to_string(),
        }
    }
}

/// Settings shared by every launch in one workflow run.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub workflow: String,
    /// Where per-attempt output and prompt files are written
    pub log_dir: PathBuf,
    /// Default working directory for workers
    pub working_dir: PathBuf,
    /// Time between SIGTERM and SIGKILL on timeout
    pub grace_period: Duration,
    pub agent: AgentInvocation,
}

/// One attempt to run a phase.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub phase: &'a Phase,
    pub timeout: Duration,
    pub attempt: u32,
}

impl<'a> LaunchRequest<'a> {
    /// First attempt with the phase's own timeout.
    pub fn new(phase: &'a Phase) -> Self {
        Self {
            phase,
            timeout: phase.timeout,
            attempt: 1,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Launches phase workers and records their lifecycle.
pub struct ProcessExecutor {
    config: ExecutorConfig,
    audit: Arc<AuditLog>,
}

impl ProcessExecutor {
    pub fn new(config: ExecutorConfig, audit: Arc<AuditLog>) -> Self {
        Self { config, audit }
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run one attempt to completion.
    ///
    /// A worker that cannot be spawned yields a `failed` record rather than an
    /// error; `Err` is reserved for a broken log sink or audit log.
    pub async fn run(&self, request: LaunchRequest<'_>) -> Result<ExecutionRecord, PhaseError> {
        match self.launch(request) {
            Ok(running) => running.finish().await,
            Err(err @ PhaseError::SpawnFailed { .. }) => self.record_spawn_failure(request, &err),
            Err(err) => Err(err),
        }
    }

    /// Spawn the worker and append its `started` record, without waiting.
    pub fn launch(&self, request: LaunchRequest<'_>) -> Result<RunningPhase, PhaseError> {
        let phase = request.phase;
        let log_path = self.log_path(&phase.name, request.attempt);

        std::fs::create_dir_all(&self.config.log_dir).map_err(|source| {
            PhaseError::LogSinkFailed {
                path: self.config.log_dir.clone(),
                source,
            }
        })?;
        let log_file =
            std::fs::File::create(&log_path).map_err(|source| PhaseError::LogSinkFailed {
                path: log_path.clone(),
                source,
            })?;
        let stderr_file = log_file
            .try_clone()
            .map_err(|source| PhaseError::LogSinkFailed {
                path: log_path.clone(),
                source,
            })?;

        let prompt_path = match &phase.command.prompt {
            Some(prompt) => {
                let path = self.prompt_path(&phase.name, request.attempt);
                std::fs::write(&path, prompt).map_err(|source| PhaseError::LogSinkFailed {
                    path: path.clone(),
                    source,
                })?;
                Some(path)
            }
            None => None,
        };

        let profile = phase
            .command
            .profile
            .clone()
            .unwrap_or_else(|| self.config.agent.profile.clone());

        let mut command = self.build_command(phase, &profile);
        command
            .current_dir(self.working_dir(phase))
            .stdin(if prompt_path.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .env("CONDUCTOR_WORKFLOW", &self.config.workflow)
            .env("CONDUCTOR_PHASE", &phase.name)
            .env("CONDUCTOR_ATTEMPT", request.attempt.to_string())
            .env("CONDUCTOR_PROFILE", &profile)
            .env("CONDUCTOR_LOG_FILE", &log_path)
            .envs(&phase.command.env)
            .kill_on_drop(true);
        if let Some(path) = &prompt_path {
            command.env("CONDUCTOR_PROMPT_FILE", path);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| PhaseError::SpawnFailed {
            phase: phase.name.clone(),
            source,
        })?;
        let started = Instant::now();
        let started_at = Utc::now();
        let pid = child.id();

        if let (Some(prompt), Some(mut stdin)) = (phase.command.prompt.clone(), child.stdin.take())
        {
            let name = phase.name.clone();
            // Written off the launch path so a worker that never reads stdin
            // cannot stall the coordinator.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(phase = %name, error = %e, "worker closed stdin before reading the prompt");
                }
            });
        }

        self.audit.append(AuditEntry::started(
            &phase.name,
            request.attempt,
            phase.group.as_deref(),
            &log_path,
        ))?;

        info!(
            phase = %phase.name,
            attempt = request.attempt,
            pid = ?pid,
            timeout_secs = request.timeout.as_secs_f64(),
            "phase started"
        );

        Ok(RunningPhase {
            phase: phase.name.clone(),
            group: phase.group.clone(),
            attempt: request.attempt,
            child,
            pid,
            started,
            started_at,
            timeout: request.timeout,
            grace_period: self.config.grace_period,
            log_path,
            audit: Arc::clone(&self.audit),
        })
    }

    /// Record a worker that could not be spawned as a failed attempt.
    pub fn record_spawn_failure(
        &self,
        request: LaunchRequest<'_>,
        err: &PhaseError,
    ) -> Result<ExecutionRecord, PhaseError> {
        warn!(phase = %request.phase.name, error = %err, "phase could not be launched");
        let now = Utc::now();
        let record = ExecutionRecord {
            phase: request.phase.name.clone(),
            status: PhaseStatus::Failed,
            exit_code: None,
            duration: Duration::ZERO,
            started_at: now,
            finished_at: now,
            attempt: request.attempt,
            group: request.phase.group.clone(),
            log_path: self.log_path(&request.phase.name, request.attempt),
            error: Some(err.to_string()),
        };
        self.audit.append(AuditEntry::terminal(&record))?;
        Ok(record)
    }

    fn build_command(&self, phase: &Phase, profile: &str) -> Command {
        match &phase.command.run {
            Some(line) => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(line);
                command
            }
            None => {
                let mut command = Command::new(&self.config.agent.program);
                command.args(
                    self.config
                        .agent
                        .args
                        .iter()
                        .map(|arg| arg.replace("{profile}", profile)),
                );
                command
            }
        }
    }

    fn working_dir(&self, phase: &Phase) -> PathBuf {
        match &phase.command.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.config.working_dir.join(dir),
            None => self.config.working_dir.clone(),
        }
    }

    /// Log file for one attempt of a phase.
    pub fn log_path(&self, phase: &str, attempt: u32) -> PathBuf {
        self.config
            .log_dir
            .join(format!("{}-{}.log", file_stem(phase), attempt))
    }

    fn prompt_path(&self, phase: &str, attempt: u32) -> PathBuf {
        self.config
            .log_dir
            .join(format!("{}-{}.prompt.md", file_stem(phase), attempt))
    }
}

/// Phase names may carry `:` (validation levels, remedies); keep file names portable.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A spawned worker whose terminal record has not been written yet.
pub struct RunningPhase {
    phase: String,
    group: Option<String>,
    attempt: u32,
    child: Child,
    pid: Option<u32>,
    started: Instant,
    started_at: DateTime<Utc>,
    timeout: Duration,
    grace_period: Duration,
    log_path: PathBuf,
    audit: Arc<AuditLog>,
}

impl RunningPhase {
    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Wait for the worker, enforcing the timeout, and append the terminal record.
    pub async fn finish(mut self) -> Result<ExecutionRecord, PhaseError> {
        let (status, exit_code) =
            match tokio::time::timeout(self.timeout, self.child.wait()).await {
                Ok(Ok(exit)) => classify_exit(exit),
                Ok(Err(e)) => {
                    warn!(phase = %self.phase, error = %e, "failed to wait for worker");
                    (PhaseStatus::Failed, None)
                }
                Err(_) => self.terminate().await,
            };

        let record = ExecutionRecord {
            phase: self.phase.clone(),
            status,
            exit_code,
            duration: self.started.elapsed(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            attempt: self.attempt,
            group: self.group.clone(),
            log_path: self.log_path.clone(),
            error: None,
        };
        self.audit.append(AuditEntry::terminal(&record))?;

        info!(
            phase = %record.phase,
            status = %record.status,
            exit_code = ?record.exit_code,
            duration_ms = record.duration.as_millis() as u64,
            "phase finished"
        );
        Ok(record)
    }

    /// SIGTERM the worker's process group, then SIGKILL after the grace period.
    async fn terminate(&mut self) -> (PhaseStatus, Option<i32>) {
        warn!(
            phase = %self.phase,
            timeout_secs = self.timeout.as_secs_f64(),
            "phase exceeded its timeout, sending SIGTERM"
        );
        self.signal(Signal::Terminate);

        match tokio::time::timeout(self.grace_period, self.child.wait()).await {
            Ok(_) => (PhaseStatus::TimedOut, Some(TIMED_OUT_EXIT_CODE)),
            Err(_) => {
                warn!(
                    phase = %self.phase,
                    grace_secs = self.grace_period.as_secs_f64(),
                    "worker survived SIGTERM, killing"
                );
                self.signal(Signal::Kill);
                if let Err(e) = self.child.kill().await {
                    debug!(phase = %self.phase, error = %e, "kill after SIGKILL reported an error");
                }
                (PhaseStatus::Killed, Some(KILLED_EXIT_CODE))
            }
        }
    }

    fn signal(&mut self, signal: Signal) {
        let Some(pid) = self.pid else {
            return;
        };
        if let Err(e) = signal_process_group(pid, signal) {
            debug!(phase = %self.phase, pid, error = %e, "signalling process group failed");
            if matches!(signal, Signal::Kill) {
                let _ = self.child.start_kill();
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_process_group(pid: u32, signal: Signal) -> std::io::Result<()> {
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) takes plain integers; the negative pid addresses the
    // process group this worker leads since spawn.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signo) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn signal_process_group(_pid: u32, _signal: Signal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process groups are not supported on this platform",
    ))
}

/// Map a normal exit to a lifecycle status.
fn classify_exit(exit: ExitStatus) -> (PhaseStatus, Option<i32>) {
    if let Some(code) = exit.code() {
        let status = if code == 0 {
            PhaseStatus::Succeeded
        } else {
            PhaseStatus::Failed
        };
        return (status, Some(code));
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = exit.signal() {
            let status = if signo == libc::SIGKILL {
                PhaseStatus::Killed
            } else {
                PhaseStatus::Failed
            };
            return (status, Some(128 + signo));
        }
    }

    (PhaseStatus::Failed, None)
}
