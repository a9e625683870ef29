use std::{collections::HashMap, error::Error, future::Future, sync::Arc};

use async_trait::async_trait;

use crate::job::{JobContext, JobPayload, JobType};

pub mod defaults;

/// The error type handlers fail with.
///
/// Any error type can be returned via `?`, and plain strings can be converted with `.into()`.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// The result of running a [`Handler`].
pub type HandlerResult = Result<(), BoxError>;

/// The executable capability registered for a [`JobType`].
///
/// Returning `Ok(())` marks the job complete. Returning an error, or panicking, is treated as a
/// failed attempt: the job is retried with backoff until it runs out of attempts.
///
/// # Example
///
/// ```
/// # use jobber::prelude::*;
/// struct OracleHandler;
///
/// #[async_trait::async_trait]
/// impl Handler for OracleHandler {
///     async fn handle(&self, payload: &JobPayload, context: JobContext) -> HandlerResult {
///         let JobPayload::OracleCall(call) = payload else {
///             return Err("unexpected payload".into());
///         };
///         println!("{} {} attempt {}", call.oracle, call.symbol, context.attempt);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, payload: &JobPayload, context: JobContext) -> HandlerResult;
}

/// A [`Handler`] backed by an async closure, see [`handler_fn`].
pub struct FnHandler<F>(F);

/// Wraps an async closure as a [`Handler`].
///
/// The closure receives its own copy of the payload.
///
/// ```
/// # use jobber::prelude::*;
/// let handler = handler_fn(|payload: JobPayload, context: JobContext| async move {
///     println!("{} attempt {}", payload.job_type(), context.attempt);
///     HandlerResult::Ok(())
/// });
/// let registry = HandlerRegistry::new().with_handler(JobType::OracleCall, handler);
/// assert!(registry.contains(JobType::OracleCall));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(JobPayload, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(JobPayload, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, payload: &JobPayload, context: JobContext) -> HandlerResult {
        (self.0)(payload.clone(), context).await
    }
}

#[async_trait]
impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    async fn handle(&self, payload: &JobPayload, context: JobContext) -> HandlerResult {
        self.as_ref().handle(payload, context).await
    }
}

/// Maps each [`JobType`] to at most one [`Handler`].
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn Handler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.job_types()).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `job_type`, replacing any existing handler.
    pub fn with_handler(mut self, job_type: JobType, handler: impl Handler + 'static) -> Self {
        self.register(job_type, Arc::new(handler));
        self
    }

    /// Registers `handler` for `job_type` returning the handler it replaced, if any.
    pub fn register(
        &mut self,
        job_type: JobType,
        handler: Arc<dyn Handler>,
    ) -> Option<Arc<dyn Handler>> {
        self.handlers.insert(job_type, handler)
    }

    pub fn remove(&mut self, job_type: JobType) -> Option<Arc<dyn Handler>> {
        self.handlers.remove(&job_type)
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// The registered job types in declaration order.
    pub fn job_types(&self) -> impl Iterator<Item = JobType> + '_ {
        JobType::ALL
            .into_iter()
            .filter(|job_type| self.contains(*job_type))
    }
}
