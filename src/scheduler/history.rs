//! Bounded record of finished jobs.

use std::collections::VecDeque;

use tracing::debug;

use crate::executor::JobExecutor;

/// Finished executors in completion order, oldest first.
#[derive(Debug)]
pub(crate) struct History {
    capacity: Option<usize>,
    entries: VecDeque<JobExecutor>,
}

impl History {
    /// Creates a history holding at most `capacity` jobs (`None` for no limit).
    pub(crate) const fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    /// Records a finished job, evicting the oldest entries beyond capacity.
    pub(crate) fn push(&mut self, executor: JobExecutor) {
        self.entries.push_back(executor);
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.entries.len() > capacity {
            if let Some(evicted) = self.entries.pop_front() {
                debug!(job_id = evicted.job_id(), "evicted job from history");
            }
        }
    }

    pub(crate) fn find(&self, job_id: &str) -> Option<&JobExecutor> {
        self.entries
            .iter()
            .find(|executor| executor.job_id() == job_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
