//! Coordinator owning the queues, the poller thread and the job history.
//!
//! One lock guards queue membership, the history, and the closed flag. It is
//! held only while lists change: executors are cloned out before anyone
//! waits on them, and processes are started by the poller after the lock is
//! released. Each executor guards its own state, so the lock order is always
//! registry first, executor second.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::executor::{ExecutorSettings, JobExecutor, Launcher};
use crate::fs::FileSystem;
use crate::job::{JobDescription, JobError, JobKind, JobState, JobStatus};
use crate::process::{InteractiveProcessFactory, ProcessError, Streams};
use crate::queue::{MULTI_QUEUE, Queue, QueuePolicy, QueueStatus, SINGLE_QUEUE, UNLIMITED_QUEUE};

mod history;

use history::History;

const POLLER_THREAD: &str = "batchq-poller";
const QUEUE_NAMES: [&str; 3] = [SINGLE_QUEUE, MULTI_QUEUE, UNLIMITED_QUEUE];

/// Per-slot result of the plural lookups; `None` mirrors a `None` input.
pub type Lookup<T> = Option<Result<T, SchedulerError>>;

#[derive(Debug)]
struct Registry {
    queues: Vec<Queue>,
    history: History,
    closed: bool,
    wake_pending: bool,
}

impl Registry {
    fn queue(&self, name: &str) -> Result<&Queue, SchedulerError> {
        self.queues
            .iter()
            .find(|queue| queue.name() == name)
            .ok_or_else(|| SchedulerError::NoSuchQueue {
                name: name.to_owned(),
            })
    }

    fn queue_mut(&mut self, name: &str) -> Result<&mut Queue, SchedulerError> {
        self.queues
            .iter_mut()
            .find(|queue| queue.name() == name)
            .ok_or_else(|| SchedulerError::NoSuchQueue {
                name: name.to_owned(),
            })
    }

    fn find(&self, job_id: &str) -> Result<JobExecutor, SchedulerError> {
        self.queues
            .iter()
            .find_map(|queue| queue.find(job_id))
            .or_else(|| self.history.find(job_id))
            .cloned()
            .ok_or_else(|| SchedulerError::NoSuchJob {
                job_id: job_id.to_owned(),
            })
    }

    /// Moves finished jobs into the history and promotes pending ones.
    fn tick(&mut self) -> Vec<JobExecutor> {
        let finished: Vec<JobExecutor> = self.queues.iter_mut().flat_map(Queue::reap).collect();
        if !finished.is_empty() {
            for executor in finished {
                self.history.push(executor);
            }
            debug!(history = self.history.len(), "reaped finished jobs");
        }
        self.queues.iter_mut().flat_map(Queue::poll).collect()
    }

    const fn ensure_open(&self) -> Result<(), SchedulerError> {
        if self.closed {
            return Err(SchedulerError::Closed);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Shared {
    config: SchedulerConfig,
    launcher: Launcher,
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<MutexGuard<'_, Registry>, SchedulerError> {
        let registry = self.lock();
        registry.ensure_open()?;
        Ok(registry)
    }

    fn wake(&self) {
        self.lock().wake_pending = true;
        self.wake.notify_all();
    }

    fn run_poller(&self) {
        let delay = self.config.polling_delay();
        let mut registry = self.lock();
        while !registry.closed {
            registry.wake_pending = false;
            let ready = registry.tick();
            drop(registry);

            for executor in ready {
                if executor.start(&self.launcher) {
                    debug!(job_id = executor.job_id(), queue = executor.queue_name(), "started job");
                }
            }

            registry = self.lock();
            if registry.closed {
                break;
            }
            registry = self
                .wake
                .wait_timeout_while(registry, delay, |r| !r.closed && !r.wake_pending)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        debug!("poller stopped");
    }
}

/// Job scheduler with `single`, `multi` and `unlimited` queues.
///
/// Jobs are started by a background poller through the configured
/// [`InteractiveProcessFactory`]. Every operation fails with
/// [`SchedulerError::Closed`] once [`JobQueueScheduler::close`] has run.
/// Dropping the scheduler closes it.
#[derive(Debug)]
pub struct JobQueueScheduler {
    shared: Arc<Shared>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueueScheduler {
    /// Validates `config` and starts the poller.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidParameter`] when `config` is out of
    /// range, or [`SchedulerError::Thread`] when the poller cannot be
    /// spawned.
    pub fn new(
        config: SchedulerConfig,
        factory: Arc<dyn InteractiveProcessFactory>,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let queues = vec![
            Queue::new(SINGLE_QUEUE, QueuePolicy::Single),
            Queue::new(MULTI_QUEUE, QueuePolicy::Multi(config.multi_queue_slots)),
            Queue::new(UNLIMITED_QUEUE, QueuePolicy::Unlimited),
        ];
        let shared = Arc::new(Shared {
            launcher: Launcher::new(factory, fs).with_start_delay(config.start_delay()),
            registry: Mutex::new(Registry {
                queues,
                history: History::new(config.history_capacity()),
                closed: false,
                wake_pending: false,
            }),
            config,
            next_id: AtomicU64::new(0),
            wake: Condvar::new(),
        });

        let poller_shared = Arc::clone(&shared);
        let poller = thread::Builder::new()
            .name(POLLER_THREAD.to_owned())
            .spawn(move || poller_shared.run_poller())
            .map_err(|err| SchedulerError::Thread {
                thread: POLLER_THREAD.to_owned(),
                message: err.to_string(),
            })?;

        info!(
            prefix = shared.launcher.job_id_prefix(),
            multi_queue_slots = shared.config.multi_queue_slots,
            polling_delay_ms = shared.config.polling_delay_ms,
            history_size = shared.config.history_size,
            "scheduler started"
        );
        Ok(Self {
            shared,
            poller: Mutex::new(Some(poller)),
        })
    }

    /// Names of the queues, in a fixed order.
    #[must_use]
    pub const fn queue_names(&self) -> &'static [&'static str] {
        &QUEUE_NAMES
    }

    /// Queue used when a description names none.
    #[must_use]
    pub const fn default_queue_name(&self) -> &'static str {
        SINGLE_QUEUE
    }

    /// Returns `false` once the scheduler has been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.shared.lock().closed
    }

    /// Queues a batch job and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidJobDescription`] when validation
    /// fails, [`SchedulerError::NoSuchQueue`] for an unknown queue, or
    /// [`SchedulerError::Closed`].
    pub fn submit_batch_job(&self, description: JobDescription) -> Result<String, SchedulerError> {
        let executor = self.submit(description, JobKind::Batch)?;
        Ok(executor.job_id().to_owned())
    }

    /// Queues an interactive job and blocks until it runs, then returns its
    /// streams.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`JobQueueScheduler::submit_batch_job`],
    /// plus [`SchedulerError::JobStart`] when the job ends without running.
    pub fn submit_interactive_job(
        &self,
        description: JobDescription,
    ) -> Result<Streams, SchedulerError> {
        let executor = self.submit(description, JobKind::Interactive)?;
        let status = executor.wait_until_running(0)?;
        let job_id = executor.job_id().to_owned();
        match status.state {
            JobState::Error | JobState::Killed => Err(SchedulerError::JobStart {
                job_id,
                source: status.error.unwrap_or(JobError::Cancelled),
            }),
            _ => executor.take_streams().ok_or_else(|| {
                warn!(job_id = %job_id, "interactive job has no streams; cancelling");
                executor.cancel();
                SchedulerError::JobStart {
                    source: JobError::Start {
                        message: ProcessError::StreamsUnavailable {
                            job_id: job_id.clone(),
                        }
                        .to_string(),
                    },
                    job_id,
                }
            }),
        }
    }

    fn submit(
        &self,
        mut description: JobDescription,
        kind: JobKind,
    ) -> Result<JobExecutor, SchedulerError> {
        self.shared.open()?;
        description.validate(kind)?;
        if kind == JobKind::Interactive {
            description.interactive = true;
        }
        let queue_name = description
            .queue_name
            .clone()
            .unwrap_or_else(|| SINGLE_QUEUE.to_owned());
        let max_runtime = description.max_runtime();

        let mut registry = self.shared.open()?;
        let queue = registry.queue_mut(&queue_name)?;
        let job_id = format!(
            "{}-{}",
            self.shared.launcher.job_id_prefix(),
            self.shared.next_id.fetch_add(1, Ordering::Relaxed)
        );
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let settings = ExecutorSettings {
            poll_interval: self.shared.config.polling_delay(),
            max_runtime,
            listener: Some(Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.wake();
                }
            })),
        };
        let executor = JobExecutor::new(job_id, queue_name, kind, description, settings);
        queue.submit(executor.clone());
        registry.wake_pending = true;
        drop(registry);
        self.shared.wake.notify_all();

        info!(
            job_id = executor.job_id(),
            queue = executor.queue_name(),
            kind = kind.label(),
            "job submitted"
        );
        Ok(executor)
    }

    fn executor(&self, job_id: &str) -> Result<JobExecutor, SchedulerError> {
        self.shared.open()?.find(job_id)
    }

    /// Returns the status of one job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoSuchJob`] for an unknown or evicted id, or
    /// [`SchedulerError::Closed`].
    pub fn job_status(&self, job_id: &str) -> Result<JobStatus, SchedulerError> {
        Ok(self.executor(job_id)?.status())
    }

    /// Returns one entry per input id, in order. Unknown ids yield an
    /// embedded error; `None` ids yield `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] after close.
    pub fn job_statuses(
        &self,
        job_ids: &[Option<&str>],
    ) -> Result<Vec<Lookup<JobStatus>>, SchedulerError> {
        let executors: Vec<Lookup<JobExecutor>> = {
            let registry = self.shared.open()?;
            job_ids
                .iter()
                .map(|id| id.map(|id| registry.find(id)))
                .collect()
        };
        Ok(executors
            .into_iter()
            .map(|slot| slot.map(|found| found.map(|executor| executor.status())))
            .collect())
    }

    /// Cancels a job and returns its status. Finished jobs are left as they
    /// are.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoSuchJob`] or [`SchedulerError::Closed`].
    pub fn cancel_job(&self, job_id: &str) -> Result<JobStatus, SchedulerError> {
        let executor = self.executor(job_id)?;
        let status = executor.cancel();
        info!(job_id, state = status.state_label(), "cancel requested");
        Ok(status)
    }

    /// Blocks until the job runs or finishes, or `timeout_millis` elapses
    /// (0 waits forever).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoSuchJob`], [`SchedulerError::Closed`], or
    /// [`SchedulerError::InvalidParameter`] for a negative timeout.
    pub fn wait_until_running(
        &self,
        job_id: &str,
        timeout_millis: i64,
    ) -> Result<JobStatus, SchedulerError> {
        self.executor(job_id)?.wait_until_running(timeout_millis)
    }

    /// Blocks until the job finishes or `timeout_millis` elapses (0 waits
    /// forever).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoSuchJob`], [`SchedulerError::Closed`], or
    /// [`SchedulerError::InvalidParameter`] for a negative timeout.
    pub fn wait_until_done(
        &self,
        job_id: &str,
        timeout_millis: i64,
    ) -> Result<JobStatus, SchedulerError> {
        self.executor(job_id)?.wait_until_done(timeout_millis)
    }

    /// Snapshot of one queue.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoSuchQueue`] or [`SchedulerError::Closed`].
    pub fn queue_status(&self, name: &str) -> Result<QueueStatus, SchedulerError> {
        Ok(self.shared.open()?.queue(name)?.status())
    }

    /// Snapshots of the named queues, one entry per input name. An empty
    /// slice selects every queue.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] after close.
    pub fn queue_statuses(
        &self,
        names: &[Option<&str>],
    ) -> Result<Vec<Lookup<QueueStatus>>, SchedulerError> {
        let registry = self.shared.open()?;
        if names.is_empty() {
            return Ok(registry
                .queues
                .iter()
                .map(|queue| Some(Ok(queue.status())))
                .collect());
        }
        Ok(names
            .iter()
            .map(|name| name.map(|name| registry.queue(name).map(Queue::status)))
            .collect())
    }

    /// Ids of pending and running jobs in the named queues, or in every queue
    /// when `names` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoSuchQueue`] or [`SchedulerError::Closed`].
    pub fn jobs(&self, names: &[&str]) -> Result<Vec<String>, SchedulerError> {
        let registry = self.shared.open()?;
        if names.is_empty() {
            return Ok(registry.queues.iter().flat_map(Queue::job_ids).collect());
        }
        let mut ids = Vec::new();
        for name in names {
            ids.extend(registry.queue(name)?.job_ids());
        }
        Ok(ids)
    }

    /// Stops the poller and cancels every pending or running job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyClosed`] on a repeated call when
    /// `strict_close` is configured; otherwise repeated calls do nothing.
    pub fn close(&self) -> Result<(), SchedulerError> {
        let active: Vec<JobExecutor> = {
            let mut registry = self.shared.lock();
            if registry.closed {
                if self.shared.config.strict_close {
                    return Err(SchedulerError::AlreadyClosed);
                }
                return Ok(());
            }
            registry.closed = true;
            registry.queues.iter_mut().flat_map(Queue::drain).collect()
        };
        self.shared.wake.notify_all();

        let handle = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("poller thread panicked");
        }

        let cancelled = active.len();
        for executor in active {
            let status = executor.cancel();
            debug!(job_id = executor.job_id(), state = status.state_label(), "cancelled on close");
        }
        info!(cancelled, "scheduler closed");
        Ok(())
    }
}

impl Drop for JobQueueScheduler {
    fn drop(&mut self) {
        if self.is_open()
            && let Err(err) = self.close()
        {
            warn!(error = %err, "failed to close scheduler");
        }
    }
}
