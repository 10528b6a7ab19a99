//! Process capability consumed by the scheduler core.
//!
//! The scheduler never talks to a transport directly. It asks an
//! [`InteractiveProcessFactory`] for an [`InteractiveProcess`] and drives it
//! through the non-blocking `is_done`/`exit_status`/`destroy` contract. Each
//! transport (host processes, the system `ssh` client, test doubles)
//! implements the pair once.

use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::fs::{FsError, InputStream, OutputStream};
use crate::job::JobDescription;

mod local;
mod ssh;

pub use local::{LocalProcess, LocalProcessFactory};
pub use ssh::{SshProcessFactory, SshTarget, expand_tilde};

/// Errors raised while creating or driving a process.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProcessError {
    /// Raised when the transport cannot start the program.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system or transport error string.
        message: String,
    },
    /// Raised when the directory for a redirected stream does not exist.
    #[error("directory {path} does not exist")]
    MissingDirectory {
        /// Directory that was expected to exist.
        path: Utf8PathBuf,
    },
    /// Raised when the stdin file named by a job does not exist.
    #[error("stdin file {path} does not exist")]
    MissingInput {
        /// File that was expected to exist.
        path: Utf8PathBuf,
    },
    /// Raised when a process does not expose its standard streams.
    #[error("streams for job {job_id} are not available")]
    StreamsUnavailable {
        /// Job whose streams were requested.
        job_id: String,
    },
    /// Raised when transport settings are blank.
    #[error("missing {field}")]
    InvalidTarget {
        /// Setting that failed validation.
        field: String,
    },
    /// Raised when copying a redirected stream fails.
    #[error("{context}: {message}")]
    Io {
        /// Stream or operation that failed.
        context: String,
        /// Operating system error string.
        message: String,
    },
    /// Wrapper for file system failures.
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Standard streams of a running process, bound to its job id.
pub struct Streams {
    job_id: String,
    stdin: Option<OutputStream>,
    stdout: Option<InputStream>,
    stderr: Option<InputStream>,
}

impl Streams {
    /// Bundles the three streams of job `job_id`.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        stdin: OutputStream,
        stdout: InputStream,
        stderr: InputStream,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr: Some(stderr),
        }
    }

    /// Job the streams belong to.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Writer connected to the process's stdin, until it is closed or taken.
    pub fn stdin(&mut self) -> Option<&mut (dyn std::io::Write + Send + 'static)> {
        self.stdin.as_deref_mut()
    }

    /// Reader connected to the process's stdout, until it is taken.
    pub fn stdout(&mut self) -> Option<&mut (dyn std::io::Read + Send + 'static)> {
        self.stdout.as_deref_mut()
    }

    /// Reader connected to the process's stderr, until it is taken.
    pub fn stderr(&mut self) -> Option<&mut (dyn std::io::Read + Send + 'static)> {
        self.stderr.as_deref_mut()
    }

    /// Closes stdin so the process observes end of input.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Moves the stdin writer out of the bundle.
    pub const fn take_stdin(&mut self) -> Option<OutputStream> {
        self.stdin.take()
    }

    /// Moves the stdout reader out of the bundle.
    pub const fn take_stdout(&mut self) -> Option<InputStream> {
        self.stdout.take()
    }

    /// Moves the stderr reader out of the bundle.
    pub const fn take_stderr(&mut self) -> Option<InputStream> {
        self.stderr.take()
    }
}

impl fmt::Debug for Streams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Streams")
            .field("job_id", &self.job_id)
            .field("stdin_open", &self.stdin.is_some())
            .field("stdout_open", &self.stdout.is_some())
            .field("stderr_open", &self.stderr.is_some())
            .finish()
    }
}

/// Handle to a started process.
///
/// Implementations must not block in any method except `destroy`, which may
/// wait briefly for the process to be reaped.
pub trait InteractiveProcess: Send {
    /// Returns `true` once the process has finished. Idempotent.
    fn is_done(&mut self) -> bool;

    /// Exit code reported by the process; meaningful only once done.
    ///
    /// Returns `None` while running or when the process was killed by a
    /// signal.
    fn exit_status(&mut self) -> Option<i32>;

    /// Forcibly terminates the process. Idempotent and best effort.
    fn destroy(&mut self);

    /// Hands out the process streams; returns `Some` at most once.
    fn take_streams(&mut self) -> Option<Streams>;

    /// First error raised while closing redirected streams, if any.
    fn close_error(&mut self) -> Option<ProcessError> {
        None
    }
}

impl fmt::Debug for dyn InteractiveProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InteractiveProcess")
    }
}

/// Creates processes for submitted jobs.
pub trait InteractiveProcessFactory: Send + Sync {
    /// Prefix prepended to job identifiers issued for this transport.
    fn job_id_prefix(&self) -> &str;

    /// Starts the program described by `description` as job `job_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when the transport cannot start the program.
    fn create(
        &self,
        description: &JobDescription,
        job_id: &str,
    ) -> Result<Box<dyn InteractiveProcess>, ProcessError>;
}
