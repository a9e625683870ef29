//! Point-in-time snapshots of the queue, suitable for serving as JSON from a status endpoint.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::JobType;

pub use crate::queue::history::{CompletedRecord, FailedRecord};

/// How many of the most recent failures a [`QueueMetrics`] snapshot carries.
pub const RECENT_FAILURES: usize = 10;

/// Above this share of failed executions the queue reports itself as degraded.
pub const DEGRADED_FAILURE_RATE: f64 = 0.25;

/// Monotonic counters since the queue was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTotals {
    pub enqueued: u64,
    pub executions: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
}

/// Per job type counts. `completed` and `failed` only cover the retained history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMetrics {
    pub queued: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub running: bool,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub uptime_ms: u64,
    /// Pending jobs that are due.
    pub queue_depth: usize,
    /// Pending jobs that are not yet due.
    pub delayed_jobs: usize,
    pub active_jobs: usize,
    pub totals: QueueTotals,
    pub by_type: BTreeMap<JobType, TypeMetrics>,
    /// Most recent first.
    pub recent_failures: Vec<FailedRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub running: bool,
    pub queue_depth: usize,
    pub delayed_jobs: usize,
    pub active_jobs: usize,
    pub failure_rate: f64,
    /// When the report was produced.
    pub timestamp: DateTime<Utc>,
}

impl QueueMetrics {
    /// The share of executions that ended with the job discarded.
    pub fn failure_rate(&self) -> f64 {
        if self.totals.executions == 0 {
            0.0
        } else {
            self.totals.failed as f64 / self.totals.executions as f64
        }
    }

    pub fn health(&self) -> HealthReport {
        let failure_rate = self.failure_rate();
        let status = if !self.running {
            HealthStatus::Down
        } else if failure_rate > DEGRADED_FAILURE_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };
        HealthReport {
            status,
            running: self.running,
            queue_depth: self.queue_depth,
            delayed_jobs: self.delayed_jobs,
            active_jobs: self.active_jobs,
            failure_rate,
            timestamp: Utc::now(),
        }
    }
}
