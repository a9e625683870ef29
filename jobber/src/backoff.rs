//! Retry backoff for [`crate::config::QueueConfig::with_backoff`].
//!
//! Failed jobs are retried after an [`Exponential`] delay by default. Anything implementing
//! [`Strategy`] can be plugged in instead.
//!
//! # Example
//!
//! ```
//! # use jobber::prelude::*;
//! # use chrono::TimeDelta;
//! let strategy = Exponential::new(TimeDelta::seconds(20)).with_max(TimeDelta::seconds(60));
//!
//! assert_eq!(strategy.backoff(1), TimeDelta::seconds(20));
//! assert_eq!(strategy.backoff(2), TimeDelta::seconds(40));
//! assert_eq!(strategy.backoff(3), TimeDelta::seconds(60));
//! ```

use chrono::TimeDelta;

/// Upper bound on any computed backoff, a century in milliseconds.
const MAX_BACKOFF_MILLISECONDS: i64 = 100 * 365 * 24 * 60 * 60 * 1_000;

/// Type that can be used to implement a backoff strategy.
pub trait Strategy {
    /// Given the attempt that just failed (starting at 1) returns the [`TimeDelta`] to wait
    /// before the job should be retried.
    fn backoff(&self, attempt: u16) -> TimeDelta;
}

/// Exponential backoff strategy.
///
/// Starts at the initial delay and doubles with each attempt, i.e. `initial * 2^(attempt - 1)`.
/// It is also possible, and advisable, to set the maximum backoff using
/// [`Exponential::with_max`]. The result is never negative.
///
/// # Example
///
/// ```
/// # use jobber::prelude::*;
/// # use chrono::TimeDelta;
///
/// let strategy = Exponential::new(TimeDelta::seconds(1)).with_max(TimeDelta::seconds(60));
///
/// assert_eq!(strategy.backoff(1), TimeDelta::seconds(1));
/// assert_eq!(strategy.backoff(2), TimeDelta::seconds(2));
/// assert_eq!(strategy.backoff(3), TimeDelta::seconds(4));
/// assert_eq!(strategy.backoff(6), TimeDelta::seconds(32));
/// assert_eq!(strategy.backoff(7), TimeDelta::seconds(60));
/// assert_eq!(strategy.backoff(40), TimeDelta::seconds(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    initial: TimeDelta,
    max: Option<TimeDelta>,
}

impl Exponential {
    /// Starts from `initial` and doubles with every attempt.
    pub const fn new(initial: TimeDelta) -> Self {
        Self { initial, max: None }
    }

    /// Clamps the maximum value to be returned by [`Strategy::backoff`] to `max_delay`.
    pub const fn with_max(mut self, max_delay: TimeDelta) -> Self {
        self.max = Some(max_delay);
        self
    }
}

impl Strategy for Exponential {
    fn backoff(&self, attempt: u16) -> TimeDelta {
        let exponent = u32::from(attempt.saturating_sub(1));
        let milliseconds = 2_i64
            .checked_pow(exponent)
            .and_then(|factor| self.initial.num_milliseconds().checked_mul(factor))
            .unwrap_or(MAX_BACKOFF_MILLISECONDS)
            .min(MAX_BACKOFF_MILLISECONDS);
        let mut backoff = TimeDelta::milliseconds(milliseconds);
        if let Some(max) = self.max {
            backoff = backoff.min(max);
        }
        backoff.max(TimeDelta::zero())
    }
}
