//! The purpose of this module is to alleviate the need to import many of the `[jobber]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use jobber::prelude::*;
//! ```
pub use crate::backoff::{Exponential, Strategy};
pub use crate::config::{QueueConfig, SystemConfig};
pub use crate::handler::{handler_fn, BoxError, Handler, HandlerRegistry, HandlerResult};
pub use crate::job::request::EnqueueRequest;
pub use crate::job::{EnqueueOptions, EnqueueReceipt, JobContext, JobId, JobPayload, JobType};
pub use crate::metrics::{HealthReport, HealthStatus, QueueMetrics};
pub use crate::queue::{JobQueue, ShutdownReport};
pub use crate::recurring::{RecurringJob, Schedule};
pub use crate::JobSystem;
pub use crate::QueueError;
