use std::collections::{BTreeMap, HashMap};

use tokio::{runtime::Handle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    config::QueueConfig,
    job::{Job, JobId, JobType},
    metrics::{QueueMetrics, QueueTotals, TypeMetrics, RECENT_FAILURES},
};

use super::{
    history::{CompletedRecord, FailedRecord, History},
    pending::PendingJobs,
};

#[derive(Debug)]
pub(crate) struct ActiveJob {
    pub(crate) job_type: JobType,
}

/// Everything the queue tracks about its jobs, guarded by a single lock.
#[derive(Debug)]
pub(crate) struct QueueState {
    pub(crate) running: bool,
    pub(crate) started_at: Option<Instant>,
    pub(crate) runtime: Option<Handle>,
    pub(crate) poller: Option<CancellationToken>,
    pub(crate) pending: PendingJobs,
    pub(crate) active: HashMap<JobId, ActiveJob>,
    pub(crate) completed: History<CompletedRecord>,
    pub(crate) failed: History<FailedRecord>,
    pub(crate) totals: QueueTotals,
    next_sequence: u64,
}

impl QueueState {
    pub(crate) fn new(history_limit: usize) -> Self {
        Self {
            running: false,
            started_at: None,
            runtime: None,
            poller: None,
            pending: PendingJobs::default(),
            active: HashMap::new(),
            completed: History::new(history_limit),
            failed: History::new(history_limit),
            totals: QueueTotals::default(),
            next_sequence: 0,
        }
    }

    pub(crate) fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    pub(crate) fn mark_job_complete(&mut self, job: &Job, duration_ms: u64) {
        self.totals.completed += 1;
        self.completed.record(CompletedRecord::new(job, duration_ms));
    }

    pub(crate) fn mark_job_discarded(&mut self, job: &Job, error: String) {
        self.totals.failed += 1;
        self.failed.record(FailedRecord::new(job, error));
    }

    pub(crate) fn mark_job_retryable(&mut self, job: Job) {
        self.totals.retried += 1;
        self.pending.push(job);
    }

    pub(crate) fn metrics(&self, config: &QueueConfig) -> QueueMetrics {
        let now = Instant::now();

        let mut by_type: BTreeMap<JobType, TypeMetrics> = JobType::ALL
            .into_iter()
            .map(|job_type| (job_type, TypeMetrics::default()))
            .collect();

        let mut queue_depth = 0;
        let mut delayed_jobs = 0;
        for job in self.pending.iter() {
            let metrics = by_type.entry(job.job_type()).or_default();
            if job.run_at <= now {
                queue_depth += 1;
                metrics.queued += 1;
            } else {
                delayed_jobs += 1;
                metrics.delayed += 1;
            }
        }
        for active in self.active.values() {
            by_type.entry(active.job_type).or_default().active += 1;
        }
        for record in self.completed.iter() {
            by_type.entry(record.job_type).or_default().completed += 1;
        }
        for record in self.failed.iter() {
            by_type.entry(record.job_type).or_default().failed += 1;
        }

        QueueMetrics {
            running: self.running,
            concurrency: config.concurrency(),
            poll_interval_ms: duration_ms(config.poll_interval()),
            uptime_ms: self
                .started_at
                .map(|started_at| duration_ms(now.saturating_duration_since(started_at)))
                .unwrap_or(0),
            queue_depth,
            delayed_jobs,
            active_jobs: self.active.len(),
            totals: self.totals,
            by_type,
            recent_failures: self.failed.iter().take(RECENT_FAILURES).cloned().collect(),
        }
    }
}

pub(crate) fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
