//! Absolute wall-clock deadlines derived from relative timeouts.
//!
//! Every blocking wait in the crate converts its caller-supplied timeout into a
//! [`Deadline`] first. A zero timeout means "wait forever", and a timeout that
//! would overflow the clock saturates to [`Deadline::Never`] instead of
//! wrapping.

use std::time::{Duration, Instant};

use crate::error::SchedulerError;

/// Point in time after which a wait gives up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Deadline {
    /// Expires at the given instant.
    At(Instant),
    /// Never expires.
    Never,
}

impl Deadline {
    /// Converts a relative timeout in milliseconds into a deadline.
    ///
    /// A timeout of `0` yields [`Deadline::Never`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidParameter`] when `timeout_millis` is
    /// negative.
    pub fn from_timeout_millis(timeout_millis: i64) -> Result<Self, SchedulerError> {
        let Ok(millis) = u64::try_from(timeout_millis) else {
            return Err(SchedulerError::InvalidParameter {
                name: String::from("timeout"),
                message: format!("must be non-negative, got {timeout_millis}"),
            });
        };
        if millis == 0 {
            return Ok(Self::Never);
        }
        Ok(Self::after(Duration::from_millis(millis)))
    }

    /// Returns a deadline `timeout` from now, saturating to
    /// [`Deadline::Never`] when the clock cannot represent it.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self::after_from(Instant::now(), timeout)
    }

    /// Returns a deadline `timeout` after `start`, saturating on overflow.
    #[must_use]
    pub fn after_from(start: Instant, timeout: Duration) -> Self {
        start.checked_add(timeout).map_or(Self::Never, Self::At)
    }

    /// Returns `true` once the deadline lies in the past.
    #[must_use]
    pub fn has_passed(&self) -> bool {
        match self {
            Self::At(instant) => Instant::now() > *instant,
            Self::Never => false,
        }
    }

    /// Time left until expiry, or `None` for a deadline that never expires.
    ///
    /// An expired deadline reports [`Duration::ZERO`].
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::At(instant) => Some(instant.saturating_duration_since(Instant::now())),
            Self::Never => None,
        }
    }
}
