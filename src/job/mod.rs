//! Job descriptions, lifecycle states and status snapshots.

use std::collections::BTreeMap;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Serialize;
use thiserror::Error;

use crate::error::SchedulerError;

/// Placeholder replaced by the job identifier in stdout/stderr templates.
pub const JOB_ID_PLACEHOLDER: &str = "%j";

/// Substitutes every [`JOB_ID_PLACEHOLDER`] in `template` with `job_id`.
///
/// # Examples
///
/// ```
/// # use batchq::job::substitute_job_id;
/// assert_eq!(substitute_job_id("out-%j.txt", "local-3"), "out-local-3.txt");
/// assert_eq!(substitute_job_id("out.txt", "local-3"), "out.txt");
/// ```
#[must_use]
pub fn substitute_job_id(template: &str, job_id: &str) -> String {
    template.replace(JOB_ID_PLACEHOLDER, job_id)
}

/// How a job's standard streams are wired.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Streams are redirected to files.
    Batch,
    /// Streams are handed to the submitter.
    Interactive,
}

impl JobKind {
    /// Lower-case label used in status info maps.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Interactive => "interactive",
        }
    }
}

/// Everything needed to run a job. Treated as immutable once submitted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobDescription {
    /// Optional human-readable name reported in [`JobStatus::job_name`].
    pub name: Option<String>,
    /// Program to run.
    pub executable: String,
    /// Arguments passed to the program.
    pub arguments: Vec<String>,
    /// Extra environment variables for the program.
    pub environment: BTreeMap<String, String>,
    /// Working directory; relative paths resolve against the transport root.
    pub working_directory: Option<Utf8PathBuf>,
    /// File fed to the program's standard input (batch only).
    pub stdin: Option<Utf8PathBuf>,
    /// Standard output file template; may contain `%j` (batch only).
    pub stdout: Option<String>,
    /// Standard error file template; may contain `%j` (batch only).
    pub stderr: Option<String>,
    /// Target queue; `None` selects the scheduler's default queue.
    pub queue_name: Option<String>,
    /// Number of nodes; must be 1.
    pub node_count: u32,
    /// Processes per node; must be 1.
    pub processes_per_node: u32,
    /// Maximum runtime in minutes; 0 means unlimited.
    pub max_runtime_minutes: i64,
    /// Marks the description as meant for interactive submission.
    pub interactive: bool,
}

impl Default for JobDescription {
    fn default() -> Self {
        Self {
            name: None,
            executable: String::new(),
            arguments: Vec::new(),
            environment: BTreeMap::new(),
            working_directory: None,
            stdin: None,
            stdout: None,
            stderr: None,
            queue_name: None,
            node_count: 1,
            processes_per_node: 1,
            max_runtime_minutes: 0,
            interactive: false,
        }
    }
}

impl JobDescription {
    /// Starts a builder for a [`JobDescription`].
    #[must_use]
    pub fn builder(executable: impl Into<String>) -> JobDescriptionBuilder {
        JobDescriptionBuilder::new(executable)
    }

    /// Maximum runtime as a duration, or `None` when unlimited.
    #[must_use]
    pub fn max_runtime(&self) -> Option<Duration> {
        u64::try_from(self.max_runtime_minutes)
            .ok()
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
    }

    /// Checks the fields that do not depend on scheduler state.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidJobDescription`] when the executable
    /// is blank, node or process counts differ from 1, the runtime limit is
    /// negative, or an interactive job names stdin/stdout/stderr.
    pub fn validate(&self, kind: JobKind) -> Result<(), SchedulerError> {
        if self.executable.trim().is_empty() {
            return Err(invalid("executable missing"));
        }
        if self.node_count != 1 {
            return Err(invalid(format!(
                "unsupported node count {}; only 1 is supported",
                self.node_count
            )));
        }
        if self.processes_per_node != 1 {
            return Err(invalid(format!(
                "unsupported processes per node {}; only 1 is supported",
                self.processes_per_node
            )));
        }
        if self.max_runtime_minutes < 0 {
            return Err(invalid(format!(
                "illegal maximum runtime {}",
                self.max_runtime_minutes
            )));
        }
        match kind {
            JobKind::Batch if self.interactive => Err(invalid(
                "description is marked interactive; submit it as an interactive job",
            )),
            JobKind::Batch => Ok(()),
            JobKind::Interactive => {
                for (field, set) in [
                    ("stdin", self.stdin.is_some()),
                    ("stdout", self.stdout.is_some()),
                    ("stderr", self.stderr.is_some()),
                ] {
                    if set {
                        return Err(invalid(format!(
                            "{field} may not be set for an interactive job"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

fn invalid(message: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidJobDescription(message.into())
}

/// Builder for [`JobDescription`].
#[derive(Clone, Debug)]
pub struct JobDescriptionBuilder {
    description: JobDescription,
}

impl JobDescriptionBuilder {
    /// Creates a builder for `executable` with every other field defaulted.
    #[must_use]
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            description: JobDescription {
                executable: executable.into(),
                ..JobDescription::default()
            },
        }
    }

    /// Sets the job name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.description.name = Some(value.into());
        self
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.description.arguments.push(value.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.description
            .arguments
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.description
            .environment
            .insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_directory(mut self, value: impl Into<Utf8PathBuf>) -> Self {
        self.description.working_directory = Some(value.into());
        self
    }

    /// Sets the stdin source file.
    #[must_use]
    pub fn stdin(mut self, value: impl Into<Utf8PathBuf>) -> Self {
        self.description.stdin = Some(value.into());
        self
    }

    /// Sets the stdout file template.
    #[must_use]
    pub fn stdout(mut self, value: impl Into<String>) -> Self {
        self.description.stdout = Some(value.into());
        self
    }

    /// Sets the stderr file template.
    #[must_use]
    pub fn stderr(mut self, value: impl Into<String>) -> Self {
        self.description.stderr = Some(value.into());
        self
    }

    /// Sets the target queue.
    #[must_use]
    pub fn queue(mut self, value: impl Into<String>) -> Self {
        self.description.queue_name = Some(value.into());
        self
    }

    /// Sets the maximum runtime in minutes.
    #[must_use]
    pub const fn max_runtime_minutes(mut self, minutes: i64) -> Self {
        self.description.max_runtime_minutes = minutes;
        self
    }

    /// Marks the description as interactive.
    #[must_use]
    pub const fn interactive(mut self, value: bool) -> Self {
        self.description.interactive = value;
        self
    }

    /// Returns the assembled description. Validation happens at submission.
    #[must_use]
    pub fn build(self) -> JobDescription {
        self.description
    }
}

/// Lifecycle state of a job, ordered by progress.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Queued, waiting for a slot.
    Pending,
    /// Process started and not yet finished.
    Running,
    /// Process exited on its own.
    Done,
    /// Process could not be started or driven.
    Error,
    /// Cancelled by the user or killed for exceeding its runtime.
    Killed,
}

impl JobState {
    /// Upper-case label reported in statuses.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
            Self::Killed => "KILLED",
        }
    }

    /// Returns `true` for `DONE`, `ERROR` and `KILLED`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Killed)
    }
}

/// Asynchronous lifecycle failures recorded on a job.
#[derive(Clone, Debug, Error, Eq, Hash, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    /// The job was cancelled explicitly or by scheduler shutdown.
    #[error("process cancelled by user")]
    Cancelled,
    /// The job exceeded its maximum runtime.
    #[error("process timed out after {limit_millis} ms")]
    TimedOut {
        /// Configured runtime limit in milliseconds.
        limit_millis: u64,
    },
    /// The process could not be created.
    #[error("failed to start process: {message}")]
    Start {
        /// Cause reported by the transport.
        message: String,
    },
    /// Redirected stream handling failed.
    #[error("stream redirection failed: {message}")]
    Io {
        /// Cause reported while copying or closing streams.
        message: String,
    },
}

/// Immutable snapshot of a job's state.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct JobStatus {
    /// Job identifier.
    pub job_id: String,
    /// Name from the job description, if any.
    pub job_name: Option<String>,
    /// Lifecycle state.
    pub state: JobState,
    /// Exit code, present once the process has finished and reported one.
    pub exit_code: Option<i32>,
    /// Lifecycle error, if any.
    pub error: Option<JobError>,
    /// `true` while the process runs.
    pub running: bool,
    /// `true` once the job reached a terminal state.
    pub done: bool,
    /// Transport and queue details.
    pub info: BTreeMap<String, String>,
}

impl JobStatus {
    /// Upper-case label of [`JobStatus::state`].
    #[must_use]
    pub const fn state_label(&self) -> &'static str {
        self.state.label()
    }

    /// Returns `true` when a lifecycle error was recorded.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
