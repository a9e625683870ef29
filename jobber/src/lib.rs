//! An in-process background job scheduler.
//!
//! Work is described by a [`job::JobPayload`], one variant per [`job::JobType`], and handed to a
//! [`queue::JobQueue`] which runs it through the [`handler::Handler`] registered for its type.
//! Jobs can be delayed, run with bounded concurrency, and are retried with exponential backoff
//! until their attempts run out. Nothing is persisted: pending jobs are lost when the process
//! exits.
//!
//! [`JobSystem`] wraps a queue with the default handlers and injects the recurring deadline
//! check and analytics jobs.
//!
//! # Example
//!
//! ```
//! # use jobber::prelude::*;
//! # use jobber::job::payload::OracleCallPayload;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), QueueError> {
//! let system = JobSystem::new(SystemConfig::default().without_recurring_jobs());
//! system.start();
//!
//! let payload = OracleCallPayload {
//!     oracle: "band".to_owned(),
//!     symbol: "XLM/USD".to_owned(),
//!     request_id: None,
//! };
//! let receipt = system.enqueue(
//!     JobType::OracleCall,
//!     payload.into(),
//!     EnqueueOptions::default().with_max_attempts(5),
//! )?;
//! assert_eq!(receipt.max_attempts, 5);
//!
//! system.stop().await;
//! # Ok(())
//! # }
//! ```
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod backoff;
pub mod config;
pub mod handler;
pub mod job;
pub mod metrics;
pub mod prelude;
pub mod queue;
pub mod recurring;
pub mod testing;

use config::SystemConfig;
use handler::{defaults::default_registry, Handler, HandlerRegistry};
use job::{request::EnqueueRequest, EnqueueOptions, EnqueueReceipt, JobPayload, JobType};
use metrics::{HealthReport, QueueMetrics};
use queue::{JobQueue, ShutdownReport};
use recurring::{default_recurring_jobs, runner::RecurringRunner, RecurringJob};

/// A [`JobQueue`] together with its recurring jobs.
///
/// Created with the default placeholder handlers; use [`JobSystem::builder`] to provide your own.
#[derive(Debug)]
pub struct JobSystem {
    queue: JobQueue,
    recurring: Vec<RecurringJob>,
    recurring_enabled: bool,
    injectors: Mutex<Option<Injectors>>,
}

#[derive(Debug)]
struct Injectors {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl JobSystem {
    pub fn new(config: SystemConfig) -> Self {
        Self::builder(config).build()
    }

    /// Reads its configuration with [`SystemConfig::from_env`].
    pub fn from_env() -> Self {
        Self::new(SystemConfig::from_env())
    }

    pub fn builder(config: SystemConfig) -> JobSystemBuilder {
        JobSystemBuilder {
            handlers: default_registry(),
            recurring: default_recurring_jobs(&config),
            config,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Starts the queue, enqueues the bootstrap jobs and starts injecting recurring jobs.
    /// Starting an already started system does nothing.
    ///
    /// # Panics
    ///
    /// When called outside of a tokio runtime.
    pub fn start(&self) {
        let mut injectors = self.injectors();
        if injectors.is_some() {
            return;
        }

        self.queue.start();

        let token = CancellationToken::new();
        let mut handles = Vec::new();
        if self.recurring_enabled {
            for job in &self.recurring {
                job.bootstrap(&self.queue);
            }
            handles = self
                .recurring
                .iter()
                .map(|job| {
                    RecurringRunner::new(self.queue.clone(), job.clone()).spawn(token.child_token())
                })
                .collect();
            tracing::info!(
                recurring_jobs = handles.len(),
                "Started job system with {} recurring jobs",
                handles.len(),
            );
        } else {
            tracing::info!("Started job system without recurring jobs");
        }
        *injectors = Some(Injectors { token, handles });
    }

    /// Stops injecting recurring jobs and then stops the queue, see [`JobQueue::stop`].
    pub async fn stop(&self) -> ShutdownReport {
        let injectors = self.injectors().take();
        if let Some(Injectors { token, handles }) = injectors {
            tracing::debug!("Shutting down recurring job injectors");
            token.cancel();
            for result in futures::future::join_all(handles).await {
                if let Err(err) = result {
                    tracing::error!(?err, "Recurring job injector failed to shut down: {err}");
                }
            }
        }
        self.queue.stop().await
    }

    pub fn enqueue(
        &self,
        job_type: JobType,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<EnqueueReceipt, QueueError> {
        self.queue.enqueue(job_type, payload, options)
    }

    pub fn enqueue_request(&self, request: EnqueueRequest) -> Result<EnqueueReceipt, QueueError> {
        let EnqueueRequest { payload, options } = request;
        self.queue.enqueue(payload.job_type(), payload, options)
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.queue.metrics()
    }

    pub fn health(&self) -> HealthReport {
        self.queue.health()
    }

    fn injectors(&self) -> std::sync::MutexGuard<'_, Option<Injectors>> {
        self.injectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Configures the handlers and recurring jobs of a [`JobSystem`].
///
/// # Example
///
/// ```
/// # use jobber::prelude::*;
/// # use jobber::testing::RecordingHandler;
/// let system = JobSystem::builder(SystemConfig::default())
///     .with_handler(JobType::NotificationSend, RecordingHandler::default())
///     .with_recurring_jobs(vec![])
///     .build();
///
/// assert!(!system.queue().is_running());
/// ```
#[derive(Debug)]
pub struct JobSystemBuilder {
    config: SystemConfig,
    handlers: HandlerRegistry,
    recurring: Vec<RecurringJob>,
}

impl JobSystemBuilder {
    /// Replaces every handler, including the defaults.
    pub fn with_handlers(self, handlers: HandlerRegistry) -> Self {
        Self { handlers, ..self }
    }

    pub fn with_handler(mut self, job_type: JobType, handler: impl Handler + 'static) -> Self {
        self.handlers.register(job_type, Arc::new(handler));
        self
    }

    /// Replaces the default recurring jobs.
    pub fn with_recurring_jobs(self, recurring: Vec<RecurringJob>) -> Self {
        Self { recurring, ..self }
    }

    pub fn build(self) -> JobSystem {
        JobSystem {
            queue: JobQueue::with_handlers(self.config.queue, self.handlers),
            recurring: self.recurring,
            recurring_enabled: self.config.recurring_enabled,
            injectors: Mutex::new(None),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("No job handler registered for type: {0}")]
    UnregisteredHandler(JobType),
    #[error("Invalid or missing job type: {0:?}")]
    UnknownJobType(String),
    #[error("Invalid payload for {job_type}: {reason}")]
    InvalidPayload { job_type: JobType, reason: String },
    #[error("Invalid enqueue options: {0}")]
    InvalidOptions(String),
    #[error("Body must be a JSON object")]
    InvalidBody,
    #[error("Error decoding request body")]
    Decode(#[from] serde_json::Error),
}
