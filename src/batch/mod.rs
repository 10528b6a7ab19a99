//! Non-interactive execution with file-redirected standard streams.
//!
//! A [`BatchProcess`] resolves the stdout/stderr templates of a job by
//! substituting its id, creates those files, feeds stdin from a file (or an
//! empty stream), and copies the process output into the files on forwarder
//! threads. `is_done` never blocks: it reports completion once the process
//! has exited and every forwarder has drained, or once the drain grace
//! period has passed. Forwarders still running then are joined when the
//! process is dropped, on the thread that owns it.

use std::io::{self, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::fs::{FileSystem, InputStream, OutputStream};
use crate::job::{JobDescription, substitute_job_id};
use crate::process::{InteractiveProcess, InteractiveProcessFactory, ProcessError, Streams};

/// How long forwarders may take to drain after the process finished.
const FORWARDER_GRACE: Duration = Duration::from_secs(5);
const FORWARDER_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug)]
struct Forwarder {
    kind: StreamKind,
    handle: JoinHandle<io::Result<u64>>,
}

/// Process wrapper that redirects standard streams to files.
#[derive(Debug)]
pub struct BatchProcess {
    job_id: String,
    process: Box<dyn InteractiveProcess>,
    forwarders: Vec<Forwarder>,
    stragglers: Vec<Forwarder>,
    drain_deadline: Option<Instant>,
    finished: bool,
    error: Option<ProcessError>,
}

/// Resolved locations of a batch job's redirected streams.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Redirection {
    /// File read into stdin.
    pub stdin: Option<Utf8PathBuf>,
    /// File receiving stdout.
    pub stdout: Option<Utf8PathBuf>,
    /// File receiving stderr.
    pub stderr: Option<Utf8PathBuf>,
}

impl Redirection {
    /// Resolves the stream paths of `description` for job `job_id`.
    ///
    /// Templates have `%j` replaced by the job id; relative paths are joined
    /// onto the job's working directory.
    #[must_use]
    pub fn resolve(description: &JobDescription, job_id: &str) -> Self {
        let workdir = description.working_directory.as_deref();
        Self {
            stdin: description
                .stdin
                .as_deref()
                .map(|path| join_workdir(workdir, path)),
            stdout: description
                .stdout
                .as_deref()
                .map(|template| join_workdir(workdir, Utf8Path::new(&substitute_job_id(template, job_id)))),
            stderr: description
                .stderr
                .as_deref()
                .map(|template| join_workdir(workdir, Utf8Path::new(&substitute_job_id(template, job_id)))),
        }
    }
}

fn join_workdir(workdir: Option<&Utf8Path>, path: &Utf8Path) -> Utf8PathBuf {
    match workdir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

impl BatchProcess {
    /// Opens the redirected streams, starts the process after `start_delay`,
    /// and begins forwarding.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::MissingInput`] when the stdin file is absent,
    /// [`ProcessError::MissingDirectory`] when an output directory is absent,
    /// [`ProcessError::Fs`] when an output file exists or cannot be created,
    /// or any error raised by `factory`.
    pub fn start(
        fs: &dyn FileSystem,
        description: &JobDescription,
        job_id: &str,
        factory: &dyn InteractiveProcessFactory,
        start_delay: Duration,
    ) -> Result<Self, ProcessError> {
        let redirection = Redirection::resolve(description, job_id);
        let stdin = open_input(fs, redirection.stdin.as_deref())?;
        let stdout = open_output(fs, redirection.stdout.as_deref())?;
        let stderr = open_output(fs, redirection.stderr.as_deref())?;

        if !start_delay.is_zero() {
            thread::sleep(start_delay);
        }

        let mut process = factory.create(description, job_id)?;
        let Some(streams) = process.take_streams() else {
            process.destroy();
            return Err(ProcessError::StreamsUnavailable {
                job_id: job_id.to_owned(),
            });
        };

        let mut batch = Self {
            job_id: job_id.to_owned(),
            process,
            forwarders: Vec::with_capacity(3),
            stragglers: Vec::new(),
            drain_deadline: None,
            finished: false,
            error: None,
        };
        if let Err(err) = batch.spawn_forwarders(streams, stdin, stdout, stderr) {
            batch.destroy();
            return Err(err);
        }
        debug!(job_id, ?redirection, "started batch process");
        Ok(batch)
    }

    fn spawn_forwarders(
        &mut self,
        mut streams: Streams,
        stdin: InputStream,
        stdout: OutputStream,
        stderr: OutputStream,
    ) -> Result<(), ProcessError> {
        if let Some(sink) = streams.take_stdin() {
            self.spawn_forwarder(StreamKind::Stdin, stdin, sink)?;
        }
        if let Some(source) = streams.take_stdout() {
            self.spawn_forwarder(StreamKind::Stdout, source, stdout)?;
        }
        if let Some(source) = streams.take_stderr() {
            self.spawn_forwarder(StreamKind::Stderr, source, stderr)?;
        }
        Ok(())
    }

    fn spawn_forwarder(
        &mut self,
        kind: StreamKind,
        mut source: InputStream,
        mut sink: OutputStream,
    ) -> Result<(), ProcessError> {
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.job_id, kind.label()))
            .spawn(move || {
                let copied = io::copy(&mut source, &mut sink)?;
                sink.flush()?;
                Ok(copied)
            })
            .map_err(|err| ProcessError::Io {
                context: format!("spawning {} forwarder for job {}", kind.label(), self.job_id),
                message: err.to_string(),
            })?;
        self.forwarders.push(Forwarder { kind, handle });
        Ok(())
    }

    /// Joins every forwarder that has already exited, recording the first
    /// failure. With `force`, forwarders still running are recorded as
    /// failures and parked until the process is dropped.
    fn collect(&mut self, force: bool) {
        for forwarder in std::mem::take(&mut self.forwarders) {
            if forwarder.handle.is_finished() {
                self.join(forwarder);
            } else if force {
                warn!(job_id = %self.job_id, stream = forwarder.kind.label(), "stream still open after process finished");
                self.record(ProcessError::Io {
                    context: self.context(forwarder.kind),
                    message: String::from("stream still open after process finished"),
                });
                self.stragglers.push(forwarder);
            } else {
                self.forwarders.push(forwarder);
            }
        }
        if force || self.forwarders.is_empty() {
            self.finished = true;
        }
    }

    fn join(&mut self, forwarder: Forwarder) {
        let context = self.context(forwarder.kind);
        match forwarder.handle.join() {
            Ok(Ok(bytes)) => {
                debug!(job_id = %self.job_id, stream = forwarder.kind.label(), bytes, "stream closed");
            }
            Ok(Err(err))
                if forwarder.kind == StreamKind::Stdin
                    && err.kind() == io::ErrorKind::BrokenPipe => {}
            Ok(Err(err)) => self.record(ProcessError::Io {
                context,
                message: err.to_string(),
            }),
            Err(_) => self.record(ProcessError::Io {
                context,
                message: String::from("forwarder panicked"),
            }),
        }
    }

    fn context(&self, kind: StreamKind) -> String {
        format!("{} forwarding for job {}", kind.label(), self.job_id)
    }

    fn record(&mut self, err: ProcessError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

impl InteractiveProcess for BatchProcess {
    fn is_done(&mut self) -> bool {
        if self.finished {
            return true;
        }
        if self.drain_deadline.is_none() {
            if !self.process.is_done() {
                return false;
            }
            self.drain_deadline = Some(Instant::now() + FORWARDER_GRACE);
        }
        let expired = self
            .drain_deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        self.collect(expired);
        self.finished
    }

    fn exit_status(&mut self) -> Option<i32> {
        self.process.exit_status()
    }

    fn destroy(&mut self) {
        self.process.destroy();
        if self.finished {
            return;
        }
        let grace_end = Instant::now() + FORWARDER_GRACE;
        while self.forwarders.iter().any(|f| !f.handle.is_finished()) && Instant::now() < grace_end
        {
            thread::sleep(FORWARDER_POLL);
        }
        self.collect(true);
    }

    fn take_streams(&mut self) -> Option<Streams> {
        None
    }

    fn close_error(&mut self) -> Option<ProcessError> {
        self.error.clone()
    }
}

impl Drop for BatchProcess {
    fn drop(&mut self) {
        for forwarder in self.forwarders.drain(..).chain(self.stragglers.drain(..)) {
            if forwarder.handle.join().is_err() {
                debug!(job_id = %self.job_id, stream = forwarder.kind.label(), "forwarder panicked");
            }
        }
    }
}

fn open_input(fs: &dyn FileSystem, path: Option<&Utf8Path>) -> Result<InputStream, ProcessError> {
    let Some(path) = path else {
        return Ok(Box::new(io::empty()));
    };
    if !fs.exists(path) {
        return Err(ProcessError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    Ok(fs.open_read(path)?)
}

fn open_output(fs: &dyn FileSystem, path: Option<&Utf8Path>) -> Result<OutputStream, ProcessError> {
    let Some(path) = path else {
        return Ok(Box::new(io::sink()));
    };
    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
        && !fs.exists(parent)
    {
        return Err(ProcessError::MissingDirectory {
            path: parent.to_path_buf(),
        });
    }
    Ok(fs.open_write(path)?)
}
