use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::{Job, JobId, JobType};

/// A job that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRecord {
    pub job_id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub completed_at: DateTime<Utc>,
    pub attempts: u16,
    pub duration_ms: u64,
}

/// A job that was discarded after its final failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecord {
    pub job_id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub failed_at: DateTime<Utc>,
    pub attempts: u16,
    pub error: String,
}

impl CompletedRecord {
    pub(crate) fn new(job: &Job, duration_ms: u64) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type(),
            completed_at: Utc::now(),
            attempts: job.attempt,
            duration_ms,
        }
    }
}

impl FailedRecord {
    pub(crate) fn new(job: &Job, error: String) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type(),
            failed_at: Utc::now(),
            attempts: job.attempt,
            error,
        }
    }
}

/// Most-recent-first records, silently dropping the oldest beyond `limit`.
#[derive(Debug)]
pub(crate) struct History<T> {
    records: VecDeque<T>,
    limit: usize,
}

impl<T> History<T> {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(limit.min(1_024)),
            limit,
        }
    }

    pub(crate) fn record(&mut self, record: T) {
        self.records.push_front(record);
        self.records.truncate(self.limit);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }
}
