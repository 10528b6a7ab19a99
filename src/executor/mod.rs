//! Per-job state machine driving one process on a dedicated worker thread.
//!
//! A [`JobExecutor`] starts in `PENDING`. When the scheduler hands it a
//! [`Launcher`], a worker thread creates the process, moves the job to
//! `RUNNING`, and polls the process until it finishes (`DONE`), exceeds its
//! runtime limit (`KILLED`), or is cancelled (`KILLED`). A failure to create
//! the process ends in `ERROR`. The state lock is never held while the worker
//! talks to the process.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::batch::BatchProcess;
use crate::deadline::Deadline;
use crate::error::SchedulerError;
use crate::fs::FileSystem;
use crate::job::{JobDescription, JobError, JobKind, JobState, JobStatus};
use crate::process::{InteractiveProcess, InteractiveProcessFactory, ProcessError, Streams};

/// Lower bound on how long [`JobExecutor::cancel`] waits for a running job.
const MIN_CANCEL_WAIT: Duration = Duration::from_secs(1);

/// Callback invoked after every terminal transition.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Everything a worker needs to create a process.
#[derive(Clone)]
pub struct Launcher {
    factory: Arc<dyn InteractiveProcessFactory>,
    fs: Arc<dyn FileSystem>,
    start_delay: Duration,
}

impl Launcher {
    /// Creates a launcher using `factory` for processes and `fs` for batch
    /// stream redirection.
    #[must_use]
    pub fn new(factory: Arc<dyn InteractiveProcessFactory>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            factory,
            fs,
            start_delay: Duration::ZERO,
        }
    }

    /// Delays each batch process start by `delay`.
    #[must_use]
    pub const fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Prefix of job ids issued for this launcher's transport.
    #[must_use]
    pub fn job_id_prefix(&self) -> &str {
        self.factory.job_id_prefix()
    }

    fn launch(
        &self,
        kind: JobKind,
        description: &JobDescription,
        job_id: &str,
    ) -> Result<Box<dyn InteractiveProcess>, ProcessError> {
        match kind {
            JobKind::Interactive => self.factory.create(description, job_id),
            JobKind::Batch => BatchProcess::start(
                self.fs.as_ref(),
                description,
                job_id,
                self.factory.as_ref(),
                self.start_delay,
            )
            .map(|process| Box::new(process) as Box<dyn InteractiveProcess>),
        }
    }
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launcher")
            .field("prefix", &self.factory.job_id_prefix())
            .field("start_delay", &self.start_delay)
            .finish_non_exhaustive()
    }
}

/// Timing settings of a [`JobExecutor`].
#[derive(Clone)]
pub struct ExecutorSettings {
    /// Interval between `is_done` polls of a running process.
    pub poll_interval: Duration,
    /// Runtime limit measured from submission, if any.
    pub max_runtime: Option<Duration>,
    /// Called after the job reaches a terminal state.
    pub listener: Option<Listener>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_runtime: None,
            listener: None,
        }
    }
}

impl fmt::Debug for ExecutorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorSettings")
            .field("poll_interval", &self.poll_interval)
            .field("max_runtime", &self.max_runtime)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct ExecState {
    state: JobState,
    exit_code: Option<i32>,
    error: Option<JobError>,
    started: bool,
    cancel_requested: bool,
    streams: Option<Streams>,
}

#[derive(Debug)]
struct Shared {
    job_id: String,
    queue: String,
    kind: JobKind,
    description: JobDescription,
    submitted_at: Instant,
    settings: ExecutorSettings,
    state: Mutex<ExecState>,
    changed: Condvar,
}

/// Thread-safe handle to one job's lifecycle. Clones share the same job.
#[derive(Clone, Debug)]
pub struct JobExecutor {
    shared: Arc<Shared>,
}

impl JobExecutor {
    /// Creates a `PENDING` executor for job `job_id` on queue `queue`.
    ///
    /// The submission time, which anchors the runtime limit, is taken now.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        queue: impl Into<String>,
        kind: JobKind,
        description: JobDescription,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                job_id: job_id.into(),
                queue: queue.into(),
                kind,
                description,
                submitted_at: Instant::now(),
                settings,
                state: Mutex::new(ExecState {
                    state: JobState::Pending,
                    exit_code: None,
                    error: None,
                    started: false,
                    cancel_requested: false,
                    streams: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Job identifier.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.shared.job_id
    }

    /// Queue the job was submitted to.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.shared.queue
    }

    /// Whether the job is batch or interactive.
    #[must_use]
    pub fn kind(&self) -> JobKind {
        self.shared.kind
    }

    /// Description the job was submitted with.
    #[must_use]
    pub fn description(&self) -> &JobDescription {
        &self.shared.description
    }

    /// Returns a consistent snapshot of the job.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.shared.snapshot(&self.shared.lock())
    }

    /// Returns `true` once the job reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.shared.lock().state.is_terminal()
    }

    /// Starts the worker thread. Only the first call on a `PENDING`
    /// executor has an effect; returns whether this call started it.
    pub fn start(&self, launcher: &Launcher) -> bool {
        {
            let mut state = self.shared.lock();
            if state.started || state.state != JobState::Pending {
                return false;
            }
            state.started = true;
        }

        let shared = Arc::clone(&self.shared);
        let worker_launcher = launcher.clone();
        let spawned = thread::Builder::new()
            .name(format!("job-{}", self.shared.job_id))
            .spawn(move || shared.run(&worker_launcher));
        if let Err(err) = spawned {
            self.shared.finish(
                JobState::Error,
                None,
                Some(JobError::Start {
                    message: format!("failed to spawn worker thread: {err}"),
                }),
            );
        }
        true
    }

    /// Cancels the job and returns its status.
    ///
    /// A job that never started is killed immediately without creating a
    /// process. A running job has its process destroyed; the call waits a
    /// bounded time for the kill to be observed. Terminal jobs are left
    /// untouched.
    pub fn cancel(&self) -> JobStatus {
        let mut state = self.shared.lock();
        if state.state.is_terminal() {
            return self.shared.snapshot(&state);
        }
        if !state.started {
            Shared::record(&mut state, JobState::Killed, None, Some(JobError::Cancelled));
            let status = self.shared.snapshot(&state);
            drop(state);
            self.shared.announce(JobState::Killed, None);
            return status;
        }

        state.cancel_requested = true;
        self.shared.changed.notify_all();
        let deadline = Deadline::after(self.shared.settings.poll_interval.max(MIN_CANCEL_WAIT));
        let settled = self
            .shared
            .wait_while(state, deadline, |s| !s.state.is_terminal());
        self.shared.snapshot(&settled)
    }

    /// Blocks until the job is running or finished, or until
    /// `timeout_millis` elapses (0 waits forever). Returns the status either
    /// way.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidParameter`] for a negative timeout.
    pub fn wait_until_running(&self, timeout_millis: i64) -> Result<JobStatus, SchedulerError> {
        let deadline = Deadline::from_timeout_millis(timeout_millis)?;
        let state = self.shared.wait_while(self.shared.lock(), deadline, |s| {
            s.state == JobState::Pending
        });
        Ok(self.shared.snapshot(&state))
    }

    /// Blocks until the job is finished or `timeout_millis` elapses (0 waits
    /// forever). Returns the status either way.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidParameter`] for a negative timeout.
    pub fn wait_until_done(&self, timeout_millis: i64) -> Result<JobStatus, SchedulerError> {
        let deadline = Deadline::from_timeout_millis(timeout_millis)?;
        let state = self
            .shared
            .wait_while(self.shared.lock(), deadline, |s| !s.state.is_terminal());
        Ok(self.shared.snapshot(&state))
    }

    /// Hands out the streams of a running interactive job, once.
    #[must_use]
    pub fn take_streams(&self) -> Option<Streams> {
        self.shared.lock().streams.take()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ExecState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, state: &ExecState) -> JobStatus {
        let mut info = BTreeMap::new();
        info.insert(String::from("queue"), self.queue.clone());
        info.insert(String::from("kind"), self.kind.label().to_owned());
        JobStatus {
            job_id: self.job_id.clone(),
            job_name: self.description.name.clone(),
            state: state.state,
            exit_code: state.exit_code,
            error: state.error.clone(),
            running: state.state == JobState::Running,
            done: state.state.is_terminal(),
            info,
        }
    }

    fn wait_while<'a, F>(
        &self,
        mut guard: MutexGuard<'a, ExecState>,
        deadline: Deadline,
        condition: F,
    ) -> MutexGuard<'a, ExecState>
    where
        F: Fn(&ExecState) -> bool,
    {
        while condition(&guard) {
            guard = match deadline.remaining() {
                None => self
                    .changed
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(remaining) if remaining.is_zero() => break,
                Some(remaining) => {
                    self.changed
                        .wait_timeout(guard, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        guard
    }

    /// Writes a terminal transition into `state` unless one already happened.
    /// Returns whether this call made the transition.
    fn record(
        state: &mut ExecState,
        next: JobState,
        exit_code: Option<i32>,
        error: Option<JobError>,
    ) -> bool {
        if state.state.is_terminal() {
            return false;
        }
        state.state = next;
        state.exit_code = exit_code;
        state.error = error;
        true
    }

    /// Records a terminal transition unless one already happened.
    fn finish(&self, next: JobState, exit_code: Option<i32>, error: Option<JobError>) {
        let recorded = Self::record(&mut self.lock(), next, exit_code, error);
        if recorded {
            self.announce(next, exit_code);
        }
    }

    /// Wakes waiters and the listener after a terminal transition. Must be
    /// called without the state lock held.
    fn announce(&self, next: JobState, exit_code: Option<i32>) {
        self.changed.notify_all();
        info!(job_id = %self.job_id, queue = %self.queue, state = next.label(), ?exit_code, "job finished");
        if let Some(ref listener) = self.settings.listener {
            listener();
        }
    }

    fn run(&self, launcher: &Launcher) {
        let cancelled = self.lock().cancel_requested;
        if cancelled {
            self.finish(JobState::Killed, None, Some(JobError::Cancelled));
            return;
        }
        let process = match launcher.launch(self.kind, &self.description, &self.job_id) {
            Ok(process) => process,
            Err(err) => {
                warn!(job_id = %self.job_id, error = %err, "job failed to start");
                self.finish(
                    JobState::Error,
                    None,
                    Some(JobError::Start {
                        message: err.to_string(),
                    }),
                );
                return;
            }
        };
        self.drive(process);
    }

    fn drive(&self, mut process: Box<dyn InteractiveProcess>) {
        {
            let mut state = self.lock();
            if state.cancel_requested || state.state.is_terminal() {
                drop(state);
                self.kill(process.as_mut(), JobError::Cancelled);
                return;
            }
            state.state = JobState::Running;
            if self.kind == JobKind::Interactive {
                state.streams = process.take_streams();
            }
        }
        self.changed.notify_all();
        debug!(job_id = %self.job_id, queue = %self.queue, "job running");

        let limit = self.settings.max_runtime;
        let runtime_deadline = limit.map(|limit| Deadline::after_from(self.submitted_at, limit));
        loop {
            if process.is_done() {
                let exit_code = process.exit_status();
                let error = process.close_error().map(|err| JobError::Io {
                    message: err.to_string(),
                });
                self.finish(JobState::Done, exit_code, error);
                return;
            }

            if let (Some(deadline), Some(limit)) = (runtime_deadline, limit)
                && deadline.has_passed()
            {
                warn!(job_id = %self.job_id, ?limit, "job exceeded its runtime limit");
                self.kill(
                    process.as_mut(),
                    JobError::TimedOut {
                        limit_millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    },
                );
                return;
            }

            let pause = runtime_deadline
                .and_then(|deadline| deadline.remaining())
                .map_or(self.settings.poll_interval, |remaining| {
                    remaining.min(self.settings.poll_interval)
                });
            let (state, _) = self
                .changed
                .wait_timeout_while(self.lock(), pause, |s| !s.cancel_requested)
                .unwrap_or_else(PoisonError::into_inner);
            let cancelled = state.cancel_requested;
            drop(state);
            if cancelled {
                self.kill(process.as_mut(), JobError::Cancelled);
                return;
            }
        }
    }

    fn kill(&self, process: &mut dyn InteractiveProcess, reason: JobError) {
        process.destroy();
        let exit_code = process.exit_status();
        self.finish(JobState::Killed, exit_code, Some(reason));
    }
}
