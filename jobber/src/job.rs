use std::{fmt::Display, str::FromStr, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::QueueError;

pub mod payload;
pub mod request;

pub use payload::JobPayload;

/// The number of attempts a job gets when [`EnqueueOptions::max_attempts`] is not given.
pub const DEFAULT_MAX_ATTEMPTS: u16 = 3;

/// The longest [`EnqueueOptions::delay_ms`] accepted at enqueue, roughly a century.
pub const MAX_DELAY_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1_000;

/// Retry delays are capped the same way to keep instant arithmetic in range.
const MAX_DELAY: Duration = Duration::from_millis(MAX_DELAY_MS);

/// An opaque identifier assigned to a job when it is enqueued.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<JobId> for Uuid {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of job types the scheduler knows how to run.
///
/// Each type is the key under which exactly one [`crate::handler::Handler`] is registered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum JobType {
    #[serde(rename = "notification.send")]
    NotificationSend,
    #[serde(rename = "deadline.check")]
    DeadlineCheck,
    #[serde(rename = "oracle.call")]
    OracleCall,
    #[serde(rename = "analytics.recompute")]
    AnalyticsRecompute,
}

impl JobType {
    /// All of the job types in declaration order.
    pub const ALL: [JobType; 4] = [
        Self::NotificationSend,
        Self::DeadlineCheck,
        Self::OracleCall,
        Self::AnalyticsRecompute,
    ];

    /// The wire tag for this job type, e.g. `"notification.send"`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotificationSend => "notification.send",
            Self::DeadlineCheck => "deadline.check",
            Self::OracleCall => "oracle.call",
            Self::AnalyticsRecompute => "analytics.recompute",
        }
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|job_type| job_type.as_str() == s)
            .ok_or_else(|| QueueError::UnknownJobType(s.to_owned()))
    }
}

/// Passed to a handler alongside the job payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: JobId,
    /// The current attempt, starting at 1 for the first execution.
    pub attempt: u16,
}

/// Scheduling options for [`crate::queue::JobQueue::enqueue`].
///
/// # Example
///
/// ```
/// # use jobber::prelude::*;
/// # use std::time::Duration;
/// let options = EnqueueOptions::default()
///     .with_delay(Duration::from_secs(5))
///     .with_max_attempts(5);
///
/// assert_eq!(options.delay_ms, Some(5_000));
/// assert_eq!(options.max_attempts, Some(5));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOptions {
    /// Milliseconds to wait before the job becomes eligible to run. Defaults to `0`.
    ///
    /// Delays above [`MAX_DELAY_MS`] are rejected with [`QueueError::InvalidOptions`].
    pub delay_ms: Option<u64>,
    /// Ceiling on execution attempts. Defaults to [`DEFAULT_MAX_ATTEMPTS`].
    pub max_attempts: Option<u16>,
}

impl EnqueueOptions {
    pub fn with_delay(self, delay: Duration) -> Self {
        Self {
            delay_ms: Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
            ..self
        }
    }

    pub fn with_delay_ms(self, delay_ms: u64) -> Self {
        Self {
            delay_ms: Some(delay_ms),
            ..self
        }
    }

    pub fn with_max_attempts(self, max_attempts: u16) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..self
        }
    }
}

/// Returned by a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReceipt {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Serialised as an ISO-8601 timestamp.
    pub run_at: DateTime<Utc>,
    pub max_attempts: u16,
}

/// A unit of deferred work owned by the queue.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) id: JobId,
    /// Enqueue order, kept across retries to break ties between equal `run_at`s.
    pub(crate) sequence: u64,
    pub(crate) payload: JobPayload,
    pub(crate) attempt: u16,
    pub(crate) max_attempts: u16,
    pub(crate) inserted_at: DateTime<Utc>,
    pub(crate) scheduled_at: DateTime<Utc>,
    pub(crate) run_at: Instant,
}

impl Job {
    pub(crate) fn new(
        sequence: u64,
        payload: JobPayload,
        max_attempts: u16,
        delay: Duration,
    ) -> Self {
        let inserted_at = Utc::now();
        let mut job = Self {
            id: JobId::new(),
            sequence,
            payload,
            attempt: 0,
            max_attempts,
            inserted_at,
            scheduled_at: inserted_at,
            run_at: Instant::now(),
        };
        job.schedule_in(delay);
        job
    }

    pub(crate) fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    pub(crate) fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub(crate) fn context(&self) -> JobContext {
        JobContext {
            job_id: self.id,
            attempt: self.attempt,
        }
    }

    pub(crate) fn mark_job_executing(&mut self) {
        self.attempt += 1;
    }

    pub(crate) fn schedule_in(&mut self, delay: Duration) {
        let delay = delay.min(MAX_DELAY);
        self.run_at = Instant::now() + delay;
        self.scheduled_at = self.inserted_at.max(Utc::now())
            + TimeDelta::from_std(delay).unwrap_or_else(|_| TimeDelta::zero());
    }

    pub(crate) fn receipt(&self) -> EnqueueReceipt {
        EnqueueReceipt {
            id: self.id,
            job_type: self.job_type(),
            run_at: self.scheduled_at,
            max_attempts: self.max_attempts,
        }
    }
}
