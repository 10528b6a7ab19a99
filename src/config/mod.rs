//! Scheduler configuration loaded via `ortho-config`.
//!
//! Values merge defaults, `batchq.toml` (located through the usual discovery
//! rules or `BATCHQ_CONFIG_PATH`), and `BATCHQ_*` environment variables, in
//! that order of precedence.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::error::SchedulerError;

/// Shortest accepted polling delay in milliseconds.
pub const MIN_POLLING_DELAY_MS: u64 = 100;
/// Longest accepted polling delay in milliseconds.
pub const MAX_POLLING_DELAY_MS: u64 = 60_000;
/// Longest accepted batch start delay in milliseconds.
pub const MAX_START_DELAY_MS: u64 = 60_000;
/// History size meaning "keep every finished job".
pub const UNLIMITED_HISTORY: i64 = -1;

/// Construction-time options of a [`crate::JobQueueScheduler`].
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BATCHQ",
    discovery(
        app_name = "batchq",
        env_var = "BATCHQ_CONFIG_PATH",
        config_file_name = "batchq.toml",
        dotfile_name = ".batchq.toml",
        project_file_name = "batchq.toml"
    )
)]
pub struct SchedulerConfig {
    /// Number of jobs the `multi` queue runs at once; must exceed 1.
    #[ortho_config(default = 4)]
    pub multi_queue_slots: usize,
    /// Pause between poller iterations, in milliseconds.
    #[ortho_config(default = 1000)]
    pub polling_delay_ms: u64,
    /// Number of finished jobs kept queryable; -1 keeps all of them.
    #[ortho_config(default = -1)]
    pub history_size: i64,
    /// Whether a second `close` fails instead of being ignored.
    #[ortho_config(default = false)]
    pub strict_close: bool,
    /// Pause before each batch process is created, in milliseconds.
    #[ortho_config(default = 0)]
    pub start_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            multi_queue_slots: 4,
            polling_delay_ms: 1000,
            history_size: UNLIMITED_HISTORY,
            strict_close: false,
            start_delay_ms: 0,
        }
    }
}

/// Errors raised when loading the scheduler configuration.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("scheduler configuration parsing failed: {0}")]
    Parse(String),
}

impl SchedulerConfig {
    /// Loads configuration from defaults, files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigLoadError> {
        Self::load_from_iter([OsString::from("batchq")])
            .map_err(|err| ConfigLoadError::Parse(err.to_string()))
    }

    /// Checks every option against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidParameter`] naming the first option
    /// that is out of range.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.multi_queue_slots <= 1 {
            return Err(out_of_range(
                "multi_queue_slots",
                format!("must be greater than 1, got {}", self.multi_queue_slots),
            ));
        }
        if !(MIN_POLLING_DELAY_MS..=MAX_POLLING_DELAY_MS).contains(&self.polling_delay_ms) {
            return Err(out_of_range(
                "polling_delay_ms",
                format!(
                    "must be between {MIN_POLLING_DELAY_MS} and {MAX_POLLING_DELAY_MS}, got {}",
                    self.polling_delay_ms
                ),
            ));
        }
        if self.history_size < UNLIMITED_HISTORY {
            return Err(out_of_range(
                "history_size",
                format!("must be -1 or greater, got {}", self.history_size),
            ));
        }
        if self.start_delay_ms > MAX_START_DELAY_MS {
            return Err(out_of_range(
                "start_delay_ms",
                format!(
                    "must be at most {MAX_START_DELAY_MS}, got {}",
                    self.start_delay_ms
                ),
            ));
        }
        Ok(())
    }

    /// Polling delay as a duration.
    #[must_use]
    pub const fn polling_delay(&self) -> Duration {
        Duration::from_millis(self.polling_delay_ms)
    }

    /// Batch start delay as a duration.
    #[must_use]
    pub const fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    /// History capacity, or `None` when unlimited.
    #[must_use]
    pub fn history_capacity(&self) -> Option<usize> {
        usize::try_from(self.history_size).ok()
    }
}

fn out_of_range(name: &str, message: String) -> SchedulerError {
    SchedulerError::InvalidParameter {
        name: name.to_owned(),
        message,
    }
}
