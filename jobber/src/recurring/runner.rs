use std::time::Duration;

use chrono::Utc;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::queue::JobQueue;

use super::{RecurringJob, Schedule};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) struct RecurringRunner {
    queue: JobQueue,
    job: RecurringJob,
}

impl RecurringRunner {
    pub(crate) fn new(queue: JobQueue, job: RecurringJob) -> Self {
        Self { queue, job }
    }

    pub(crate) fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self.job.schedule.clone() {
                Schedule::Interval(period) => self.run_every(period, &token).await,
                Schedule::Cron(schedule) => self.run_cron(&schedule, &token).await,
            }
            tracing::debug!(
                job_type = %self.job.job_type(),
                "Shutting down recurring {} injector",
                self.job.job_type(),
            );
        })
    }

    async fn run_every(&self, period: Duration, token: &CancellationToken) {
        let period = period.max(MIN_INTERVAL);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.job.inject(&self.queue),
                _ = token.cancelled() => break,
            }
        }
    }

    async fn run_cron(&self, schedule: &cron::Schedule, token: &CancellationToken) {
        let mut last = Utc::now();
        loop {
            let Some(next) = schedule.after(&last).next() else {
                tracing::warn!(
                    job_type = %self.job.job_type(),
                    "No future scheduled time for recurring {} job",
                    self.job.job_type(),
                );
                break;
            };
            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.job.inject(&self.queue);
                    last = next;
                },
                _ = token.cancelled() => break,
            }
        }
    }
}
