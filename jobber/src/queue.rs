//! The in-process job queue.
//!
//! Jobs wait in a pending set ordered by when they become due. A dispatcher moves due jobs into
//! the active set, never exceeding the configured concurrency, and spawns each execution onto the
//! runtime. Failed executions are retried with a backoff until their attempts run out, at which
//! point they are recorded as failed.
//!
//! Dispatch runs when a job is enqueued, when an execution finishes and on every poll interval,
//! so a delayed job starts within one poll interval of becoming due.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    runtime::Handle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::QueueConfig,
    handler::{Handler, HandlerRegistry},
    job::{
        EnqueueOptions, EnqueueReceipt, Job, JobPayload, JobType, DEFAULT_MAX_ATTEMPTS,
        MAX_DELAY_MS,
    },
    metrics::{HealthReport, QueueMetrics},
    QueueError,
};

pub(crate) mod history;
mod pending;
mod runner;
mod state;

use state::{ActiveJob, QueueState};

const NO_HANDLER: &str = "No handler registered";

/// The outcome of [`JobQueue::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    /// Whether every active job finished within the grace period.
    pub drained: bool,
    /// Jobs still executing when `stop` returned.
    pub still_active: usize,
}

/// A cloneable handle to an in-process job queue.
///
/// # Example
///
/// ```
/// # use jobber::prelude::*;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), QueueError> {
/// let queue = JobQueue::new(QueueConfig::default());
/// queue.register_handler(
///     JobType::OracleCall,
///     handler_fn(|_payload, _context| async { HandlerResult::Ok(()) }),
/// );
///
/// queue.start();
/// let payload = JobPayload::from_parts(
///     JobType::OracleCall,
///     serde_json::json!({"oracle": "band", "symbol": "XLM/USD"}),
/// )?;
/// let receipt = queue.enqueue(JobType::OracleCall, payload, EnqueueOptions::default())?;
/// assert_eq!(receipt.max_attempts, 3);
///
/// let report = queue.stop().await;
/// assert!(report.drained);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    config: QueueConfig,
    handlers: RwLock<HandlerRegistry>,
    state: Mutex<QueueState>,
    dispatching: AtomicBool,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.inner.config)
            .field("handlers", &*self.handlers())
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_handlers(config, HandlerRegistry::new())
    }

    pub fn with_handlers(config: QueueConfig, handlers: HandlerRegistry) -> Self {
        let state = QueueState::new(config.history_limit());
        Self {
            inner: Arc::new(Inner {
                config,
                handlers: RwLock::new(handlers),
                state: Mutex::new(state),
                dispatching: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Registers the handler for `job_type`, replacing any existing one.
    pub fn register_handler(&self, job_type: JobType, handler: impl Handler + 'static) {
        let replaced = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(job_type, Arc::new(handler));
        if replaced.is_some() {
            tracing::debug!(%job_type, "Replaced handler for {job_type}");
        }
    }

    /// Unregisters the handler for `job_type`. Jobs of that type still pending fail when
    /// dispatched.
    pub fn remove_handler(&self, job_type: JobType) -> bool {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_type)
            .is_some()
    }

    /// Adds a job to the queue.
    ///
    /// The job becomes due after `options.delay_ms`. `options.max_attempts` is clamped between
    /// one and [`QueueConfig::max_attempts_limit`].
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the queue untouched, when no handler is registered for
    /// `job_type`, the payload does not belong to `job_type` or fails validation, or the delay
    /// exceeds [`crate::job::MAX_DELAY_MS`].
    pub fn enqueue(
        &self,
        job_type: JobType,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<EnqueueReceipt, QueueError> {
        if !self.handlers().contains(job_type) {
            return Err(QueueError::UnregisteredHandler(job_type));
        }
        if payload.job_type() != job_type {
            return Err(QueueError::InvalidPayload {
                job_type,
                reason: format!("expected a {job_type} payload, got {}", payload.job_type()),
            });
        }
        payload.validate()?;

        let delay_ms = options.delay_ms.unwrap_or(0);
        if delay_ms > MAX_DELAY_MS {
            return Err(QueueError::InvalidOptions(format!(
                "delayMs must be <= {MAX_DELAY_MS}, got {delay_ms}"
            )));
        }
        let delay = Duration::from_millis(delay_ms);
        let max_attempts = options
            .max_attempts
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
            .clamp(1, self.config().max_attempts_limit());

        let (receipt, running) = {
            let mut state = self.state();
            let sequence = state.next_sequence();
            let job = Job::new(sequence, payload, max_attempts, delay);
            let receipt = job.receipt();
            state.pending.push(job);
            state.totals.enqueued += 1;
            (receipt, state.running)
        };

        tracing::debug!(
            job_id = %receipt.id,
            %job_type,
            run_at = %receipt.run_at,
            "Enqueued {job_type} job {}",
            receipt.id,
        );

        if running {
            self.dispatch();
        }
        Ok(receipt)
    }

    /// Starts dispatching jobs. Calling `start` on a running queue does nothing.
    ///
    /// # Panics
    ///
    /// When called outside of a tokio runtime.
    pub fn start(&self) {
        let runtime = Handle::current();
        let token = {
            let mut state = self.state();
            if state.running {
                return;
            }
            let token = CancellationToken::new();
            state.running = true;
            state.started_at = Some(Instant::now());
            state.runtime = Some(runtime.clone());
            state.poller = Some(token.clone());
            token
        };

        tracing::info!(
            concurrency = self.config().concurrency(),
            poll_interval = ?self.config().poll_interval(),
            "Starting job queue",
        );
        runtime.spawn(self.clone().poll(token));
        self.dispatch();
    }

    /// Stops dispatching and waits up to [`QueueConfig::shutdown_grace`] for active jobs to
    /// finish.
    ///
    /// Jobs still running after the grace period are left to finish in the background and
    /// pending jobs stay queued until the next [`JobQueue::start`].
    pub async fn stop(&self) -> ShutdownReport {
        let poller = {
            let mut state = self.state();
            state.running = false;
            state.poller.take()
        };
        let Some(poller) = poller else {
            return self.shutdown_report();
        };
        poller.cancel();
        tracing::info!("Stopping job queue");

        let deadline = Instant::now() + self.config().shutdown_grace();
        loop {
            let report = self.shutdown_report();
            if report.drained {
                tracing::info!("Job queue stopped");
                return report;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    still_active = report.still_active,
                    "Job queue stopped with {} jobs still running",
                    report.still_active,
                );
                return report;
            }
            tokio::time::sleep(self.config().drain_poll_interval()).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.state().metrics(self.config())
    }

    pub fn health(&self) -> HealthReport {
        self.metrics().health()
    }

    fn shutdown_report(&self) -> ShutdownReport {
        let still_active = self.state().active.len();
        ShutdownReport {
            drained: still_active == 0,
            still_active,
        }
    }

    async fn poll(self, token: CancellationToken) {
        let period = self.config().poll_interval();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.dispatch(),
                _ = token.cancelled() => break,
            }
        }
        tracing::debug!("Shutting down job queue poller");
    }

    /// Moves due jobs into the active set until it is full. Only one dispatch runs at a time; a
    /// call made while another is in progress returns immediately.
    pub(crate) fn dispatch(&self) {
        if self
            .inner
            .dispatching
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let _guard = DispatchGuard(&self.inner.dispatching);

        loop {
            let (job, handler, runtime) = {
                let mut state = self.state();
                if !state.running || state.active.len() >= self.config().concurrency() {
                    return;
                }
                let Some(runtime) = state.runtime.clone() else {
                    return;
                };
                let Some(mut job) = state.pending.pop_due(Instant::now()) else {
                    return;
                };
                let Some(handler) = self.handlers().get(job.job_type()) else {
                    tracing::error!(
                        job_id = %job.id,
                        job_type = %job.job_type(),
                        "Discarding job {}: no handler registered for {}",
                        job.id,
                        job.job_type(),
                    );
                    state.mark_job_discarded(&job, NO_HANDLER.to_owned());
                    continue;
                };
                job.mark_job_executing();
                state.active.insert(
                    job.id,
                    ActiveJob {
                        job_type: job.job_type(),
                    },
                );
                state.totals.executions += 1;
                (job, handler, runtime)
            };
            runtime.spawn(self.clone().execute_job(job, handler));
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> RwLockReadGuard<'_, HandlerRegistry> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::{
        handler::{handler_fn, HandlerResult},
        job::payload::NotificationPayload,
        metrics::QueueMetrics,
        testing::{
            assert_pending, FailingHandler, FlakyHandler, RecordingHandler, SleepingHandler,
        },
    };
    use assert_matches::assert_matches;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn queue_with(job_type: JobType, handler: impl Handler + 'static) -> JobQueue {
        let queue = JobQueue::new(QueueConfig::default());
        queue.register_handler(job_type, handler);
        queue
    }

    fn notification(subject: &str) -> JobPayload {
        NotificationPayload {
            recipient: "ops@example.com".to_owned(),
            subject: subject.to_owned(),
            body: "body".to_owned(),
        }
        .into()
    }

    fn enqueue_oracle_call(queue: &JobQueue, options: EnqueueOptions) -> EnqueueReceipt {
        queue
            .enqueue(JobType::OracleCall, JobPayload::oracle_call(), options)
            .unwrap()
    }

    fn assert_conserved(metrics: &QueueMetrics) {
        let totals = metrics.totals;
        let pending = (metrics.queue_depth + metrics.delayed_jobs) as u64;
        assert_eq!(
            totals.enqueued,
            totals.completed + totals.failed + pending + metrics.active_jobs as u64,
            "{metrics:#?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_without_handler_is_rejected() {
        let queue = JobQueue::new(QueueConfig::default());
        queue.start();

        let result = queue.enqueue(
            JobType::OracleCall,
            JobPayload::oracle_call(),
            EnqueueOptions::default(),
        );

        assert_matches!(
            result,
            Err(QueueError::UnregisteredHandler(JobType::OracleCall))
        );
        let metrics = queue.metrics();
        assert_eq!(metrics.totals.enqueued, 0);
        assert_eq!(metrics.queue_depth, 0);
        assert_eq!(metrics.delayed_jobs, 0);
    }

    #[tokio::test]
    async fn enqueue_rejects_payload_of_another_type() {
        let queue = queue_with(JobType::OracleCall, RecordingHandler::default());

        let result = queue.enqueue(
            JobType::OracleCall,
            JobPayload::notification(),
            EnqueueOptions::default(),
        );

        assert_matches!(
            result,
            Err(QueueError::InvalidPayload { job_type: JobType::OracleCall, .. })
        );
        assert_eq!(queue.metrics().totals.enqueued, 0);
    }

    #[tokio::test]
    async fn enqueue_rejects_invalid_payload() {
        let queue = queue_with(JobType::NotificationSend, RecordingHandler::default());

        let result = queue.enqueue(
            JobType::NotificationSend,
            notification(""),
            EnqueueOptions::default(),
        );

        assert_matches!(result, Err(QueueError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn enqueue_clamps_max_attempts() {
        let queue = queue_with(JobType::OracleCall, RecordingHandler::default());

        let defaulted = enqueue_oracle_call(&queue, EnqueueOptions::default());
        let too_many = enqueue_oracle_call(&queue, EnqueueOptions::default().with_max_attempts(50));
        let zero = enqueue_oracle_call(&queue, EnqueueOptions::default().with_max_attempts(0));

        assert_eq!(defaulted.max_attempts, 3);
        assert_eq!(too_many.max_attempts, 10);
        assert_eq!(zero.max_attempts, 1);
        assert_eq!(queue.metrics().totals.enqueued, 3);
    }

    #[tokio::test]
    async fn enqueue_rejects_delays_beyond_the_limit() {
        let queue = queue_with(JobType::OracleCall, RecordingHandler::default());
        let before = Utc::now();

        let result = queue.enqueue(
            JobType::OracleCall,
            JobPayload::oracle_call(),
            EnqueueOptions::default().with_delay_ms(MAX_DELAY_MS + 1),
        );
        assert_matches!(result, Err(QueueError::InvalidOptions(_)));
        assert_eq!(queue.metrics().totals.enqueued, 0);

        let receipt =
            enqueue_oracle_call(&queue, EnqueueOptions::default().with_delay_ms(MAX_DELAY_MS));

        assert!(receipt.run_at >= before + TimeDelta::milliseconds(MAX_DELAY_MS as i64));
        assert_eq!(queue.metrics().delayed_jobs, 1);
    }

    #[tokio::test]
    async fn enqueue_before_start_waits_in_the_queue() {
        let handler = RecordingHandler::default();
        let queue = queue_with(JobType::OracleCall, handler.clone());

        enqueue_oracle_call(&queue, EnqueueOptions::default());
        enqueue_oracle_call(&queue, EnqueueOptions::default().with_delay_ms(60_000));

        let metrics = queue.metrics();
        assert!(!metrics.running);
        assert_eq!(metrics.queue_depth, 1);
        assert_eq!(metrics.delayed_jobs, 1);
        assert_pending!(2 jobs, in: queue, of: JobType::OracleCall);
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_reports_when_the_job_is_due() {
        let queue = queue_with(JobType::OracleCall, RecordingHandler::default());

        let before = Utc::now();
        let receipt = enqueue_oracle_call(&queue, EnqueueOptions::default().with_delay_ms(1_500));
        let after = Utc::now();

        assert_eq!(receipt.job_type, JobType::OracleCall);
        assert!(receipt.run_at >= before + TimeDelta::milliseconds(1_500));
        assert!(receipt.run_at <= after + TimeDelta::milliseconds(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_runs_once_due() {
        let handler = RecordingHandler::default();
        let queue = queue_with(JobType::OracleCall, handler.clone());
        queue.start();

        enqueue_oracle_call(&queue, EnqueueOptions::default().with_delay_ms(100_000));
        settle().await;

        let metrics = queue.metrics();
        assert_eq!(metrics.queue_depth, 0);
        assert_eq!(metrics.delayed_jobs, 1);

        tokio::time::sleep(Duration::from_millis(99_000)).await;
        assert_eq!(handler.calls(), 0);

        tokio::time::sleep(Duration::from_millis(1_300)).await;
        assert_eq!(handler.calls(), 1);
        let metrics = queue.metrics();
        assert_eq!(metrics.delayed_jobs, 0);
        assert_eq!(metrics.totals.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_failure_is_not_retried() {
        let handler = FailingHandler::new("boom");
        let queue = queue_with(JobType::NotificationSend, handler.clone());
        queue.start();

        queue
            .enqueue(
                JobType::NotificationSend,
                JobPayload::notification(),
                EnqueueOptions::default().with_max_attempts(1),
            )
            .unwrap();
        settle().await;

        let metrics = queue.metrics();
        assert_eq!(handler.calls(), 1);
        assert_eq!(metrics.totals.executions, 1);
        assert_eq!(metrics.totals.failed, 1);
        assert_eq!(metrics.totals.retried, 0);
        assert_eq!(metrics.recent_failures.len(), 1);
        assert_eq!(metrics.recent_failures[0].error, "boom");
        assert_eq!(metrics.recent_failures[0].attempts, 1);
        assert_eq!(
            metrics.by_type[&JobType::NotificationSend].failed,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_retry_with_exponential_backoff() {
        let handler = FlakyHandler::new(2);
        let queue = queue_with(JobType::OracleCall, handler.clone());
        queue.start();

        let start = Instant::now();
        enqueue_oracle_call(&queue, EnqueueOptions::default());
        settle().await;

        let next_run = |queue: &JobQueue| queue.state().pending.iter().map(|job| job.run_at).next();
        assert_eq!(handler.attempts(), vec![1]);
        assert_eq!(next_run(&queue), Some(start + Duration::from_secs(1)));
        assert_eq!(queue.metrics().totals.retried, 1);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(handler.attempts(), vec![1, 2]);
        assert_eq!(next_run(&queue), Some(start + Duration::from_secs(3)));

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(handler.attempts(), vec![1, 2, 3]);
        let metrics = queue.metrics();
        assert_eq!(metrics.totals.executions, 3);
        assert_eq!(metrics.totals.retried, 2);
        assert_eq!(metrics.totals.completed, 1);
        assert_eq!(metrics.totals.failed, 0);
        assert_eq!(next_run(&queue), None);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_jobs_are_discarded_once() {
        let handler = FailingHandler::new("still broken");
        let queue = queue_with(JobType::OracleCall, handler.clone());
        queue.start();

        let receipt = enqueue_oracle_call(&queue, EnqueueOptions::default().with_max_attempts(2));
        tokio::time::sleep(Duration::from_secs(10)).await;

        let metrics = queue.metrics();
        assert_eq!(handler.calls(), 2);
        assert_eq!(metrics.totals.failed, 1);
        assert_eq!(metrics.totals.retried, 1);
        assert_eq!(metrics.recent_failures[0].job_id, receipt.id);
        assert_eq!(metrics.recent_failures[0].attempts, 2);
        assert_pending!(0 jobs, in: queue, of: JobType::OracleCall);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handler.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panics_are_recorded_as_failures() {
        let queue = queue_with(JobType::OracleCall, FailingHandler::panicking("kaboom"));
        queue.start();

        enqueue_oracle_call(&queue, EnqueueOptions::default().with_max_attempts(1));
        settle().await;

        let metrics = queue.metrics();
        assert_eq!(metrics.totals.failed, 1);
        assert_eq!(metrics.recent_failures[0].error, "kaboom");
        assert_eq!(metrics.active_jobs, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_errors_are_recorded_as_unknown() {
        let queue = queue_with(
            JobType::OracleCall,
            handler_fn(|_payload, _context| async { HandlerResult::Err("".into()) }),
        );
        queue.start();

        enqueue_oracle_call(&queue, EnqueueOptions::default().with_max_attempts(1));
        settle().await;

        assert_eq!(queue.metrics().recent_failures[0].error, "Unknown error");
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency() {
        let handler = RecordingHandler::with_delay(Duration::from_millis(100));
        let queue = JobQueue::new(QueueConfig::default().with_concurrency(2));
        queue.register_handler(JobType::OracleCall, handler.clone());

        for _ in 0..10 {
            enqueue_oracle_call(&queue, EnqueueOptions::default());
        }
        queue.start();
        settle().await;

        let metrics = queue.metrics();
        assert_eq!(metrics.active_jobs, 2);
        assert_eq!(metrics.queue_depth, 8);

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(queue.metrics().active_jobs <= 2);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handler.calls(), 10);
        assert_eq!(handler.peak_concurrency(), 2);
        assert_eq!(queue.metrics().totals.completed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn every_enqueued_job_is_accounted_for() {
        let queue = JobQueue::new(QueueConfig::default().with_concurrency(3));
        queue.register_handler(
            JobType::NotificationSend,
            RecordingHandler::with_delay(Duration::from_millis(300)),
        );
        queue.register_handler(JobType::OracleCall, FlakyHandler::new(1));
        queue.register_handler(JobType::DeadlineCheck, FailingHandler::new("boom"));
        queue.start();

        for n in 0..5 {
            queue
                .enqueue(
                    JobType::NotificationSend,
                    notification(&format!("subject {n}")),
                    EnqueueOptions::default().with_delay_ms(n * 100),
                )
                .unwrap();
            enqueue_oracle_call(&queue, EnqueueOptions::default());
            queue
                .enqueue(
                    JobType::DeadlineCheck,
                    JobPayload::scheduled_deadline_check(),
                    EnqueueOptions::default().with_max_attempts(2),
                )
                .unwrap();
        }

        for _ in 0..20 {
            assert_conserved(&queue.metrics());
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let metrics = queue.metrics();
        assert_conserved(&metrics);
        assert_eq!(metrics.totals.enqueued, 15);
        assert_eq!(metrics.totals.completed, 10);
        assert_eq!(metrics.totals.failed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_runs_one_cycle_at_a_time() {
        let handler = RecordingHandler::default();
        let queue = queue_with(JobType::OracleCall, handler.clone());
        queue.start();
        settle().await;

        queue.inner.dispatching.store(true, Ordering::SeqCst);
        enqueue_oracle_call(&queue, EnqueueOptions::default());
        queue.dispatch();
        settle().await;

        assert_eq!(queue.metrics().queue_depth, 1);
        assert_eq!(handler.calls(), 0);

        queue.inner.dispatching.store(false, Ordering::SeqCst);
        queue.dispatch();
        settle().await;

        assert_eq!(handler.calls(), 1);
        assert_eq!(queue.metrics().totals.completed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueues_never_exceed_concurrency() {
        const PRODUCERS: usize = 8;
        const JOBS_PER_PRODUCER: usize = 100;
        let total = (PRODUCERS * JOBS_PER_PRODUCER) as u64;

        let handler = RecordingHandler::with_delay(Duration::from_millis(1));
        let queue = JobQueue::new(
            QueueConfig::default()
                .with_concurrency(3)
                .with_poll_interval(Duration::from_millis(10)),
        );
        queue.register_handler(JobType::OracleCall, handler.clone());
        queue.start();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for _ in 0..JOBS_PER_PRODUCER {
                        enqueue_oracle_call(&queue, EnqueueOptions::default());
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let sampling = async {
            loop {
                let metrics = queue.metrics();
                assert!(metrics.active_jobs <= 3, "{metrics:#?}");
                assert_conserved(&metrics);
                if metrics.totals.completed == total {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(30), sampling)
            .await
            .unwrap();
        for producer in futures::future::join_all(producers).await {
            producer.unwrap();
        }

        assert_eq!(handler.calls(), total as usize);
        assert!(handler.peak_concurrency() <= 3);
        assert_eq!(queue.metrics().totals.failed, 0);
        assert!(queue.stop().await.drained);
    }

    #[tokio::test(start_paused = true)]
    async fn equally_due_jobs_run_in_enqueue_order() {
        let handler = RecordingHandler::default();
        let queue = JobQueue::new(QueueConfig::default().with_concurrency(1));
        queue.register_handler(JobType::NotificationSend, handler.clone());

        for subject in ["first", "second", "third"] {
            queue
                .enqueue(
                    JobType::NotificationSend,
                    notification(subject),
                    EnqueueOptions::default(),
                )
                .unwrap();
        }
        queue.start();
        settle().await;

        assert_eq!(
            handler.payloads(),
            vec![
                notification("first"),
                notification("second"),
                notification("third")
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_due_jobs_run_first() {
        let handler = RecordingHandler::default();
        let queue = JobQueue::new(QueueConfig::default().with_concurrency(1));
        queue.register_handler(JobType::NotificationSend, handler.clone());
        queue.start();

        for (subject, delay_ms) in [("late", 500), ("early", 100)] {
            queue
                .enqueue(
                    JobType::NotificationSend,
                    notification(subject),
                    EnqueueOptions::default().with_delay_ms(delay_ms),
                )
                .unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            handler.payloads(),
            vec![notification("early"), notification("late")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn removed_handler_fails_pending_jobs_without_an_attempt() {
        let queue = queue_with(JobType::OracleCall, RecordingHandler::default());
        enqueue_oracle_call(&queue, EnqueueOptions::default());

        assert!(queue.remove_handler(JobType::OracleCall));
        assert!(!queue.remove_handler(JobType::OracleCall));
        queue.start();
        settle().await;

        let metrics = queue.metrics();
        assert_eq!(metrics.totals.executions, 0);
        assert_eq!(metrics.totals.failed, 1);
        assert_eq!(metrics.recent_failures[0].error, "No handler registered");
        assert_eq!(metrics.recent_failures[0].attempts, 0);
        assert_conserved(&metrics);
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_bounded() {
        let queue = JobQueue::new(QueueConfig::default().with_history_limit(3));
        queue.register_handler(JobType::OracleCall, RecordingHandler::default());
        queue.start();

        for _ in 0..5 {
            enqueue_oracle_call(&queue, EnqueueOptions::default());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let metrics = queue.metrics();
        assert_eq!(metrics.totals.completed, 5);
        assert_eq!(metrics.by_type[&JobType::OracleCall].completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recent_failures_are_capped() {
        let queue = queue_with(JobType::OracleCall, FailingHandler::new("boom"));
        queue.start();

        let receipts: Vec<_> = (0..12)
            .map(|_| enqueue_oracle_call(&queue, EnqueueOptions::default().with_max_attempts(1)))
            .collect();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let metrics = queue.metrics();
        assert_eq!(metrics.totals.failed, 12);
        assert_eq!(metrics.by_type[&JobType::OracleCall].failed, 12);
        assert_eq!(metrics.recent_failures.len(), 10);
        assert_eq!(metrics.recent_failures[0].job_id, receipts[11].id);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_gives_up_after_the_grace_period() {
        let handler = SleepingHandler::new(Duration::from_secs(5));
        let queue = queue_with(JobType::OracleCall, handler.clone());
        queue.start();
        enqueue_oracle_call(&queue, EnqueueOptions::default());
        settle().await;
        assert!(handler.started());

        let stopping = Instant::now();
        let report = queue.stop().await;
        let waited = stopping.elapsed();

        assert_eq!(
            report,
            ShutdownReport {
                drained: false,
                still_active: 1
            }
        );
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_millis(2_100));
        assert!(!handler.finished());
        assert!(!queue.is_running());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(handler.finished());
        let metrics = queue.metrics();
        assert_eq!(metrics.active_jobs, 0);
        assert_eq!(metrics.totals.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_active_jobs() {
        let handler = SleepingHandler::new(Duration::from_millis(100));
        let queue = queue_with(JobType::OracleCall, handler.clone());
        queue.start();
        enqueue_oracle_call(&queue, EnqueueOptions::default());
        settle().await;

        let stopping = Instant::now();
        let report = queue.stop().await;

        assert!(report.drained);
        assert!(handler.finished());
        assert!(stopping.elapsed() <= Duration::from_millis(125));
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let queue = queue_with(JobType::OracleCall, RecordingHandler::default());

        assert!(queue.stop().await.drained);

        queue.start();
        queue.start();
        assert!(queue.is_running());

        assert!(queue.stop().await.drained);
        assert!(queue.stop().await.drained);
        assert!(!queue.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_queue_keeps_jobs_until_restarted() {
        let handler = RecordingHandler::default();
        let queue = queue_with(JobType::OracleCall, handler.clone());
        queue.start();
        queue.stop().await;

        enqueue_oracle_call(&queue, EnqueueOptions::default());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handler.calls(), 0);
        assert_eq!(queue.metrics().queue_depth, 1);

        queue.start();
        settle().await;
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_report_uptime_without_side_effects() {
        let queue = queue_with(JobType::OracleCall, RecordingHandler::default());
        assert_eq!(queue.metrics().uptime_ms, 0);

        queue.start();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let metrics = queue.metrics();
        assert!(metrics.running);
        assert_eq!(metrics.uptime_ms, 1_500);
        assert_eq!(metrics.concurrency, 2);
        assert_eq!(metrics.poll_interval_ms, 250);
        assert_eq!(metrics, queue.metrics());
        assert_eq!(metrics.by_type.len(), JobType::ALL.len());
    }

    #[tokio::test(start_paused = true)]
    async fn health_reflects_failures() {
        let queue = queue_with(JobType::OracleCall, FailingHandler::new("boom"));
        assert_eq!(queue.health().status, crate::metrics::HealthStatus::Down);

        queue.start();
        assert_eq!(queue.health().status, crate::metrics::HealthStatus::Ok);

        enqueue_oracle_call(&queue, EnqueueOptions::default().with_max_attempts(1));
        settle().await;
        assert_eq!(queue.health().status, crate::metrics::HealthStatus::Degraded);
    }
}
