//! Host processes started with `std::process`.

use std::process::{Child, Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::job::JobDescription;

use super::{InteractiveProcess, InteractiveProcessFactory, ProcessError, Streams};

/// Starts jobs as child processes of the current program.
#[derive(Clone, Debug)]
pub struct LocalProcessFactory {
    root: Utf8PathBuf,
}

impl LocalProcessFactory {
    /// Creates a factory resolving relative working directories against
    /// `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root used for relative working directories.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

impl InteractiveProcessFactory for LocalProcessFactory {
    fn job_id_prefix(&self) -> &str {
        "local"
    }

    fn create(
        &self,
        description: &JobDescription,
        job_id: &str,
    ) -> Result<Box<dyn InteractiveProcess>, ProcessError> {
        let workdir = resolve_working_directory(&self.root, description.working_directory.as_deref());
        let child = Command::new(&description.executable)
            .args(&description.arguments)
            .envs(&description.environment)
            .current_dir(&workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ProcessError::Spawn {
                program: description.executable.clone(),
                message: err.to_string(),
            })?;
        debug!(job_id, pid = child.id(), %workdir, "started local process");
        Ok(Box::new(LocalProcess::new(job_id, child)))
    }
}

/// Resolves a job's working directory against a transport root.
pub(crate) fn resolve_working_directory(
    root: &Utf8Path,
    working_directory: Option<&Utf8Path>,
) -> Utf8PathBuf {
    match working_directory {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => root.join(path),
        None => root.to_path_buf(),
    }
}

/// A running child process with piped standard streams.
#[derive(Debug)]
pub struct LocalProcess {
    job_id: String,
    child: Child,
    streams: Option<Streams>,
    exit_code: Option<i32>,
    done: bool,
}

impl LocalProcess {
    /// Wraps a spawned child; its piped streams become the job's
    /// [`Streams`].
    #[must_use]
    pub fn new(job_id: &str, mut child: Child) -> Self {
        let streams = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => Some(Streams::new(
                job_id,
                Box::new(stdin),
                Box::new(stdout),
                Box::new(stderr),
            )),
            _ => None,
        };
        Self {
            job_id: job_id.to_owned(),
            child,
            streams,
            exit_code: None,
            done: false,
        }
    }
}

impl InteractiveProcess for LocalProcess {
    fn is_done(&mut self) -> bool {
        if self.done {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_code = status.code();
                self.done = true;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(job_id = %self.job_id, error = %err, "failed to poll child process");
                self.done = true;
            }
        }
        self.done
    }

    fn exit_status(&mut self) -> Option<i32> {
        self.exit_code
    }

    fn destroy(&mut self) {
        if self.done {
            return;
        }
        if let Err(err) = self.child.kill() {
            warn!(job_id = %self.job_id, error = %err, "failed to kill child process");
        }
        match self.child.wait() {
            Ok(status) => self.exit_code = status.code(),
            Err(err) => {
                warn!(job_id = %self.job_id, error = %err, "failed to reap child process");
            }
        }
        self.done = true;
    }

    fn take_streams(&mut self) -> Option<Streams> {
        self.streams.take()
    }
}
