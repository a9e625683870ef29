//! Helpers for testing code that enqueues or handles jobs.
#![allow(unused)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    handler::{Handler, HandlerResult},
    job::{JobContext, JobPayload},
};

/// A macro for asserting how many jobs of a type are waiting in a queue, due or delayed.
///
/// # Example
///
/// ```
/// # use jobber::prelude::*;
/// # use jobber::testing::{assert_pending, RecordingHandler};
/// # use jobber::job::payload::{DeadlineCheckPayload, TriggerSource};
/// let queue = JobQueue::new(QueueConfig::default());
/// queue.register_handler(JobType::DeadlineCheck, RecordingHandler::default());
///
/// let payload = DeadlineCheckPayload {
///     vault_id: None,
///     deadline_iso: None,
///     trigger_source: TriggerSource::Manual,
/// };
/// queue
///     .enqueue(JobType::DeadlineCheck, payload.into(), EnqueueOptions::default())
///     .unwrap();
///
/// assert_pending!(1 job, in: queue, of: JobType::DeadlineCheck);
/// assert_pending!(0 jobs, in: queue, of: JobType::OracleCall);
/// ```
#[macro_export]
macro_rules! assert_pending {
    (1 job, in: $queue:expr, of: $job_type:expr) => {
        $crate::assert_pending!(@internal 1, $queue, $job_type)
    };
    ($n:literal jobs, in: $queue:expr, of: $job_type:expr) => {
        $crate::assert_pending!(@internal $n, $queue, $job_type)
    };
    (@internal $n:literal, $queue:expr, $job_type:expr) => {{
        let metrics = $queue.metrics();
        let by_type = metrics.by_type.get(&$job_type).copied().unwrap_or_default();
        let pending = by_type.queued + by_type.delayed;
        assert!(
            pending == $n,
            "Unexpected number of pending {} jobs,\n\n\
            Expected {} jobs, found {pending}\n\n\
            Metrics:\n\
            {metrics:#?}",
            $job_type,
            $n,
        );
    }};
}

pub use assert_pending;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Succeeds, optionally after a delay, recording every call it receives.
///
/// Clones share their recordings.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    delay: Option<Duration>,
    inner: Arc<Recording>,
}

#[derive(Debug, Default)]
struct Recording {
    calls: Mutex<Vec<(JobPayload, JobContext)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingHandler {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        lock(&self.inner.calls).len()
    }

    pub fn payloads(&self) -> Vec<JobPayload> {
        lock(&self.inner.calls)
            .iter()
            .map(|(payload, _)| payload.clone())
            .collect()
    }

    pub fn contexts(&self) -> Vec<JobContext> {
        lock(&self.inner.calls)
            .iter()
            .map(|(_, context)| *context)
            .collect()
    }

    /// The most calls that were in progress at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, payload: &JobPayload, context: JobContext) -> HandlerResult {
        lock(&self.inner.calls).push((payload.clone(), context));
        let running = self.inner.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails every call, either by returning an error or by panicking.
#[derive(Debug, Clone)]
pub struct FailingHandler {
    message: String,
    panics: bool,
    calls: Arc<AtomicUsize>,
}

impl FailingHandler {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            panics: false,
            calls: Arc::default(),
        }
    }

    pub fn panicking(message: impl Into<String>) -> Self {
        Self {
            panics: true,
            ..Self::new(message)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, _payload: &JobPayload, _context: JobContext) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("{}", self.message);
        }
        Err(self.message.clone().into())
    }
}

/// Fails the first `failures` attempts of every job and succeeds after that.
#[derive(Debug, Clone, Default)]
pub struct FlakyHandler {
    failures: u16,
    attempts: Arc<Mutex<Vec<u16>>>,
}

impl FlakyHandler {
    pub fn new(failures: u16) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }

    /// The attempt number of every call, in call order.
    pub fn attempts(&self) -> Vec<u16> {
        lock(&self.attempts).clone()
    }
}

#[async_trait]
impl Handler for FlakyHandler {
    async fn handle(&self, _payload: &JobPayload, context: JobContext) -> HandlerResult {
        lock(&self.attempts).push(context.attempt);
        if context.attempt <= self.failures {
            return Err(format!("attempt {} failed", context.attempt).into());
        }
        Ok(())
    }
}

/// Sleeps for a fixed duration, flagging when it starts and finishes.
#[derive(Debug, Clone, Default)]
pub struct SleepingHandler {
    duration: Duration,
    started: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl SleepingHandler {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for SleepingHandler {
    async fn handle(&self, _payload: &JobPayload, _context: JobContext) -> HandlerResult {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}
