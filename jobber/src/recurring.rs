//! Jobs injected into the queue on a schedule, either a fixed interval or a cron expression.
//!
//! Each [`RecurringJob`] may also carry a bootstrap payload, enqueued once when the
//! [`crate::JobSystem`] starts so that the work does not wait a full period for its first run.
use std::time::Duration;

use crate::{
    config::SystemConfig,
    job::{
        payload::{
            AnalyticsRecomputePayload, AnalyticsScope, DeadlineCheckPayload, TriggerSource,
        },
        EnqueueOptions, JobPayload, JobType,
    },
    queue::JobQueue,
};

pub(crate) mod runner;

/// The delay before the analytics bootstrap job runs.
pub const ANALYTICS_BOOTSTRAP_DELAY: Duration = Duration::from_millis(5_000);

/// When a recurring job fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Every period, the first tick one full period after start.
    Interval(Duration),
    /// At each upcoming time of a cron schedule, in UTC.
    Cron(cron::Schedule),
}

/// A payload injected into the queue on a [`Schedule`].
///
/// # Example
///
/// ```
/// # use jobber::prelude::*;
/// # use jobber::job::payload::{DeadlineCheckPayload, TriggerSource};
/// # use std::time::Duration;
/// let payload = DeadlineCheckPayload {
///     vault_id: None,
///     deadline_iso: None,
///     trigger_source: TriggerSource::Scheduler,
/// };
/// let job = RecurringJob::every(Duration::from_secs(60), payload.clone())
///     .with_bootstrap(payload, Duration::ZERO);
///
/// assert_eq!(job.job_type(), JobType::DeadlineCheck);
/// ```
#[derive(Debug, Clone)]
pub struct RecurringJob {
    payload: JobPayload,
    schedule: Schedule,
    bootstrap: Option<Bootstrap>,
}

#[derive(Debug, Clone)]
struct Bootstrap {
    payload: JobPayload,
    delay: Duration,
}

impl RecurringJob {
    pub fn every(interval: Duration, payload: impl Into<JobPayload>) -> Self {
        Self {
            payload: payload.into(),
            schedule: Schedule::Interval(interval),
            bootstrap: None,
        }
    }

    pub fn cron(schedule: cron::Schedule, payload: impl Into<JobPayload>) -> Self {
        Self {
            payload: payload.into(),
            schedule: Schedule::Cron(schedule),
            bootstrap: None,
        }
    }

    /// Enqueue `payload` once, `delay` after the system starts.
    pub fn with_bootstrap(self, payload: impl Into<JobPayload>, delay: Duration) -> Self {
        Self {
            bootstrap: Some(Bootstrap {
                payload: payload.into(),
                delay,
            }),
            ..self
        }
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub(crate) fn bootstrap(&self, queue: &JobQueue) {
        if let Some(bootstrap) = &self.bootstrap {
            enqueue(
                queue,
                &bootstrap.payload,
                EnqueueOptions::default().with_delay(bootstrap.delay),
            );
        }
    }

    pub(crate) fn inject(&self, queue: &JobQueue) {
        enqueue(queue, &self.payload, EnqueueOptions::default());
    }
}

fn enqueue(queue: &JobQueue, payload: &JobPayload, options: EnqueueOptions) {
    let job_type = payload.job_type();
    match queue.enqueue(job_type, payload.clone(), options) {
        Ok(receipt) => tracing::debug!(
            job_id = %receipt.id,
            %job_type,
            "Injected recurring {job_type} job {}",
            receipt.id,
        ),
        Err(err) => tracing::error!(
            ?err,
            %job_type,
            "Failed to inject recurring {job_type} job: {err}",
        ),
    }
}

/// The deadline check and analytics refresh jobs, at the intervals in `config`.
pub fn default_recurring_jobs(config: &SystemConfig) -> Vec<RecurringJob> {
    let deadline_check = DeadlineCheckPayload {
        vault_id: None,
        deadline_iso: None,
        trigger_source: TriggerSource::Scheduler,
    };
    let analytics = |reason: &str| AnalyticsRecomputePayload {
        scope: AnalyticsScope::Global,
        entity_id: None,
        reason: Some(reason.to_owned()),
    };

    vec![
        RecurringJob::every(config.deadline_check_interval, deadline_check.clone())
            .with_bootstrap(deadline_check, Duration::ZERO),
        RecurringJob::every(
            config.analytics_recompute_interval,
            analytics("scheduled-refresh"),
        )
        .with_bootstrap(analytics("startup-bootstrap"), ANALYTICS_BOOTSTRAP_DELAY),
    ]
}
