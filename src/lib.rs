//! Core library for the batchq job scheduler.
//!
//! A [`JobQueueScheduler`] accepts job descriptions into three named queues
//! (`single`, `multi`, `unlimited`), starts them through an
//! [`InteractiveProcessFactory`] as queue slots free up, and keeps finished
//! jobs queryable in a bounded history. Batch jobs have their standard
//! streams redirected to files through a [`FileSystem`]; interactive jobs
//! hand their streams to the submitter.

pub mod batch;
pub mod config;
pub mod deadline;
pub mod error;
pub mod executor;
pub mod fs;
pub mod job;
pub mod process;
pub mod queue;
pub mod scheduler;
pub mod test_support;

pub use batch::{BatchProcess, Redirection};
pub use config::{ConfigLoadError, SchedulerConfig};
pub use deadline::Deadline;
pub use error::SchedulerError;
pub use executor::{ExecutorSettings, JobExecutor, Launcher};
pub use fs::{FileSystem, FsError, LocalFileSystem};
pub use job::{JobDescription, JobDescriptionBuilder, JobError, JobKind, JobState, JobStatus};
pub use process::{
    InteractiveProcess, InteractiveProcessFactory, LocalProcessFactory, ProcessError,
    SshProcessFactory, SshTarget, Streams,
};
pub use queue::{Queue, QueuePolicy, QueueStatus};
pub use scheduler::{JobQueueScheduler, Lookup};
