//! Named queues holding pending and running executors.
//!
//! A queue never starts anything itself. The scheduler's poller calls
//! [`Queue::reap`] to remove finished jobs and [`Queue::poll`] to promote
//! pending jobs, in submission order, up to the queue's slot limit.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::Serialize;

use crate::executor::JobExecutor;

/// Name of the queue running one job at a time.
pub const SINGLE_QUEUE: &str = "single";
/// Name of the queue running a fixed number of jobs at a time.
pub const MULTI_QUEUE: &str = "multi";
/// Name of the queue running every job immediately.
pub const UNLIMITED_QUEUE: &str = "unlimited";

/// Concurrency limit of a queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueuePolicy {
    /// At most one running job.
    Single,
    /// At most the given number of running jobs.
    Multi(usize),
    /// No limit.
    Unlimited,
}

impl QueuePolicy {
    /// Maximum number of running jobs, or `None` when unbounded.
    #[must_use]
    pub const fn slots(self) -> Option<usize> {
        match self {
            Self::Single => Some(1),
            Self::Multi(slots) => Some(slots),
            Self::Unlimited => None,
        }
    }

    /// Lower-case policy name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi(_) => "multi",
            Self::Unlimited => "unlimited",
        }
    }
}

impl fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slots() {
            Some(slots) => write!(f, "{} ({slots} slots)", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// Snapshot of one queue.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct QueueStatus {
    /// Queue name.
    pub name: String,
    /// Policy label: `single`, `multi` or `unlimited`.
    pub policy: String,
    /// Slot limit, absent for unbounded queues.
    pub slots: Option<usize>,
    /// Pending job ids in submission order.
    pub pending: Vec<String>,
    /// Running job ids in start order.
    pub running: Vec<String>,
    /// Free-form details.
    pub info: BTreeMap<String, String>,
}

/// Pending and running executors sharing one policy.
#[derive(Debug)]
pub struct Queue {
    name: String,
    policy: QueuePolicy,
    pending: VecDeque<JobExecutor>,
    running: Vec<JobExecutor>,
}

impl Queue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: QueuePolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            pending: VecDeque::new(),
            running: Vec::new(),
        }
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Concurrency policy.
    #[must_use]
    pub const fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Appends a job to the pending list.
    pub fn submit(&mut self, executor: JobExecutor) {
        self.pending.push_back(executor);
    }

    /// Removes finished jobs from both lists and returns them.
    pub fn reap(&mut self) -> Vec<JobExecutor> {
        let mut finished = Vec::new();
        self.running.retain(|executor| {
            let terminal = executor.is_terminal();
            if terminal {
                finished.push(executor.clone());
            }
            !terminal
        });
        self.pending.retain(|executor| {
            let terminal = executor.is_terminal();
            if terminal {
                finished.push(executor.clone());
            }
            !terminal
        });
        finished
    }

    /// Moves pending jobs into free slots, oldest first, and returns the
    /// jobs that should now be started.
    pub fn poll(&mut self) -> Vec<JobExecutor> {
        let free = self
            .policy
            .slots()
            .map_or(usize::MAX, |slots| slots.saturating_sub(self.running.len()));
        let count = free.min(self.pending.len());
        let promoted: Vec<JobExecutor> = self.pending.drain(..count).collect();
        self.running.extend(promoted.iter().cloned());
        promoted
    }

    /// Looks up a pending or running job.
    #[must_use]
    pub fn find(&self, job_id: &str) -> Option<&JobExecutor> {
        self.running
            .iter()
            .chain(self.pending.iter())
            .find(|executor| executor.job_id() == job_id)
    }

    /// Ids of running jobs followed by pending jobs.
    #[must_use]
    pub fn job_ids(&self) -> Vec<String> {
        self.running
            .iter()
            .chain(self.pending.iter())
            .map(|executor| executor.job_id().to_owned())
            .collect()
    }

    /// Returns `true` when no job is pending or running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }

    /// Snapshot of the queue.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        let mut info = BTreeMap::new();
        info.insert(String::from("policy"), self.policy.to_string());
        QueueStatus {
            name: self.name.clone(),
            policy: self.policy.label().to_owned(),
            slots: self.policy.slots(),
            pending: self
                .pending
                .iter()
                .map(|executor| executor.job_id().to_owned())
                .collect(),
            running: self
                .running
                .iter()
                .map(|executor| executor.job_id().to_owned())
                .collect(),
            info,
        }
    }

    /// Removes every job, running ones first.
    pub fn drain(&mut self) -> Vec<JobExecutor> {
        let mut all: Vec<JobExecutor> = self.running.drain(..).collect();
        all.extend(self.pending.drain(..));
        all
    }
}
