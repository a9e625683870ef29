//! Configuration for the [`crate::queue::JobQueue`] and the [`crate::JobSystem`].
//!
//! The queue is configured programmatically via [`QueueConfig`]. [`SystemConfig`] additionally
//! carries the recurring job settings and can be read from the environment with
//! [`SystemConfig::from_env`]:
//!
//! | variable | default |
//! | --- | --- |
//! | `JOB_WORKER_CONCURRENCY` | `2` |
//! | `JOB_QUEUE_POLL_INTERVAL_MS` | `250` |
//! | `JOB_HISTORY_LIMIT` | `50` |
//! | `DEADLINE_CHECK_INTERVAL_MS` | `60000` |
//! | `ANALYTICS_RECOMPUTE_INTERVAL_MS` | `300000` |
//! | `ENABLE_JOB_SCHEDULER` | enabled unless exactly `false` |
//!
//! Missing, non-numeric, or non-positive values fall back to the defaults.
use std::{fmt::Debug, sync::Arc, time::Duration};

use chrono::TimeDelta;

use crate::{
    backoff::{Exponential, Strategy},
    job::request::MAX_ATTEMPTS_LIMIT,
};

pub const JOB_WORKER_CONCURRENCY: &str = "JOB_WORKER_CONCURRENCY";
pub const JOB_QUEUE_POLL_INTERVAL_MS: &str = "JOB_QUEUE_POLL_INTERVAL_MS";
pub const JOB_HISTORY_LIMIT: &str = "JOB_HISTORY_LIMIT";
pub const DEADLINE_CHECK_INTERVAL_MS: &str = "DEADLINE_CHECK_INTERVAL_MS";
pub const ANALYTICS_RECOMPUTE_INTERVAL_MS: &str = "ANALYTICS_RECOMPUTE_INTERVAL_MS";
pub const ENABLE_JOB_SCHEDULER: &str = "ENABLE_JOB_SCHEDULER";

/// The default retry backoff:
///  - exponential backoff starting at 1 second and doubling each attempt,
///  - with a max backoff of 60 seconds.
pub const DEFAULT_BACKOFF_STRATEGY: Exponential =
    Exponential::new(TimeDelta::seconds(1)).with_max(TimeDelta::seconds(60));

/// Configuration for a [`crate::queue::JobQueue`].
///
/// # Example
///
/// ```
/// # use jobber::prelude::*;
/// # use std::time::Duration;
/// let config = QueueConfig::default()
///     .with_concurrency(4)
///     .with_poll_interval(Duration::from_millis(100))
///     .with_history_limit(200);
///
/// assert_eq!(config.concurrency(), 4);
/// ```
#[derive(Clone)]
pub struct QueueConfig {
    concurrency: usize,
    poll_interval: Duration,
    history_limit: usize,
    max_attempts_limit: u16,
    shutdown_grace: Duration,
    drain_poll_interval: Duration,
    backoff: Arc<dyn Strategy + Send + Sync>,
}

impl Debug for QueueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConfig")
            .field("concurrency", &self.concurrency)
            .field("poll_interval", &self.poll_interval)
            .field("history_limit", &self.history_limit)
            .field("max_attempts_limit", &self.max_attempts_limit)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("drain_poll_interval", &self.drain_poll_interval)
            .finish_non_exhaustive()
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: Self::DEFAULT_CONCURRENCY,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            history_limit: Self::DEFAULT_HISTORY_LIMIT,
            max_attempts_limit: MAX_ATTEMPTS_LIMIT,
            shutdown_grace: Self::DEFAULT_SHUTDOWN_GRACE,
            drain_poll_interval: Self::DEFAULT_DRAIN_POLL_INTERVAL,
            backoff: Arc::new(DEFAULT_BACKOFF_STRATEGY),
        }
    }
}

impl QueueConfig {
    pub const DEFAULT_CONCURRENCY: usize = 2;
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
    pub const DEFAULT_HISTORY_LIMIT: usize = 50;
    pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(2_000);
    pub const DEFAULT_DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

    /// The maximum number of jobs executing at once. `0` falls back to the default.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = positive_or(concurrency, Self::DEFAULT_CONCURRENCY);
        self
    }

    /// How often the dispatcher wakes up to look for due jobs. Zero falls back to the default.
    ///
    /// This bounds the latency between a job becoming due and it being dispatched.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = if poll_interval.is_zero() {
            Self::DEFAULT_POLL_INTERVAL
        } else {
            poll_interval
        };
        self
    }

    /// How many completed and failed records are kept. `0` falls back to the default.
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = positive_or(history_limit, Self::DEFAULT_HISTORY_LIMIT);
        self
    }

    /// The ceiling that enqueued `max_attempts` are clamped to.
    pub fn with_max_attempts_limit(mut self, max_attempts_limit: u16) -> Self {
        self.max_attempts_limit = max_attempts_limit.max(1);
        self
    }

    /// How long [`crate::queue::JobQueue::stop`] waits for active jobs to finish.
    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    /// The strategy used to delay retries of failed jobs.
    pub fn with_backoff(mut self, backoff: impl Strategy + Send + Sync + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn max_attempts_limit(&self) -> u16 {
        self.max_attempts_limit
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub(crate) fn drain_poll_interval(&self) -> Duration {
        self.drain_poll_interval
    }

    /// The delay before retrying a job whose `attempt` just failed.
    pub(crate) fn retry_delay(&self, attempt: u16) -> Duration {
        self.backoff.backoff(attempt).to_std().unwrap_or(Duration::ZERO)
    }
}

fn positive_or(value: usize, fallback: usize) -> usize {
    if value == 0 {
        fallback
    } else {
        value
    }
}

/// Configuration for a [`crate::JobSystem`], read once at construction.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub queue: QueueConfig,
    pub deadline_check_interval: Duration,
    pub analytics_recompute_interval: Duration,
    /// When `false` no recurring jobs are injected.
    pub recurring_enabled: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            deadline_check_interval: Self::DEFAULT_DEADLINE_CHECK_INTERVAL,
            analytics_recompute_interval: Self::DEFAULT_ANALYTICS_RECOMPUTE_INTERVAL,
            recurring_enabled: true,
        }
    }
}

impl SystemConfig {
    pub const DEFAULT_DEADLINE_CHECK_INTERVAL: Duration = Duration::from_millis(60_000);
    pub const DEFAULT_ANALYTICS_RECOMPUTE_INTERVAL: Duration = Duration::from_millis(300_000);

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration using `lookup` to resolve each variable.
    ///
    /// ```
    /// # use jobber::config::SystemConfig;
    /// let config = SystemConfig::from_lookup(|key| match key {
    ///     "JOB_WORKER_CONCURRENCY" => Some("8".to_owned()),
    ///     "ENABLE_JOB_SCHEDULER" => Some("false".to_owned()),
    ///     _ => None,
    /// });
    ///
    /// assert_eq!(config.queue.concurrency(), 8);
    /// assert!(!config.recurring_enabled);
    /// ```
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let positive = |key: &str, fallback: u64| {
            let value = parse_positive_integer(lookup(key).as_deref(), fallback);
            tracing::trace!(key, value, "Resolved job system setting");
            value
        };

        let queue = QueueConfig::default()
            .with_concurrency(positive(
                JOB_WORKER_CONCURRENCY,
                QueueConfig::DEFAULT_CONCURRENCY as u64,
            ) as usize)
            .with_poll_interval(Duration::from_millis(positive(
                JOB_QUEUE_POLL_INTERVAL_MS,
                QueueConfig::DEFAULT_POLL_INTERVAL.as_millis() as u64,
            )))
            .with_history_limit(positive(
                JOB_HISTORY_LIMIT,
                QueueConfig::DEFAULT_HISTORY_LIMIT as u64,
            ) as usize);

        Self {
            queue,
            deadline_check_interval: Duration::from_millis(positive(
                DEADLINE_CHECK_INTERVAL_MS,
                Self::DEFAULT_DEADLINE_CHECK_INTERVAL.as_millis() as u64,
            )),
            analytics_recompute_interval: Duration::from_millis(positive(
                ANALYTICS_RECOMPUTE_INTERVAL_MS,
                Self::DEFAULT_ANALYTICS_RECOMPUTE_INTERVAL.as_millis() as u64,
            )),
            recurring_enabled: lookup(ENABLE_JOB_SCHEDULER).as_deref() != Some("false"),
        }
    }

    pub fn with_queue(self, queue: QueueConfig) -> Self {
        Self { queue, ..self }
    }

    pub fn without_recurring_jobs(self) -> Self {
        Self {
            recurring_enabled: false,
            ..self
        }
    }
}

fn parse_positive_integer(value: Option<&str>, fallback: u64) -> u64 {
    value
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 1.0)
        .map(|value| value.floor() as u64)
        .unwrap_or(fallback)
}
