//! Errors returned synchronously by the scheduler API.

use thiserror::Error;

use crate::job::JobError;

/// Errors raised at the scheduler's API boundary.
///
/// Lifecycle failures of a running job are not reported here; they surface
/// asynchronously through [`crate::JobStatus::error`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SchedulerError {
    /// Raised when a construction or call parameter is out of range.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Name of the offending parameter.
        name: String,
        /// Description of the accepted range.
        message: String,
    },
    /// Raised when a job description fails validation.
    #[error("invalid job description: {0}")]
    InvalidJobDescription(String),
    /// Raised when a queue name is not known to the scheduler.
    #[error("no such queue: {name}")]
    NoSuchQueue {
        /// Queue name supplied by the caller.
        name: String,
    },
    /// Raised when a job id is unknown or was evicted from history.
    #[error("no such job: {job_id}")]
    NoSuchJob {
        /// Job identifier supplied by the caller.
        job_id: String,
    },
    /// Raised by any operation invoked after the scheduler was closed.
    #[error("scheduler is closed")]
    Closed,
    /// Raised by a repeated `close` when strict close is configured.
    #[error("scheduler is already closed")]
    AlreadyClosed,
    /// Raised when an interactive job never reaches the running state.
    #[error("job {job_id} failed to start: {source}")]
    JobStart {
        /// Identifier of the job that failed.
        job_id: String,
        /// Lifecycle error recorded by the job.
        source: JobError,
    },
    /// Raised when a background thread cannot be spawned.
    #[error("failed to spawn {thread} thread: {message}")]
    Thread {
        /// Name of the thread that failed to spawn.
        thread: String,
        /// Operating system error string.
        message: String,
    },
}
