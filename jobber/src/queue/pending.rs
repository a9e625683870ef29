use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

use tokio::time::Instant;

use crate::job::Job;

/// Jobs waiting to run, ordered by `run_at` and then by enqueue order.
#[derive(Debug, Default)]
pub(crate) struct PendingJobs {
    heap: BinaryHeap<Reverse<PendingJob>>,
}

#[derive(Debug)]
struct PendingJob(Job);

impl PendingJob {
    fn key(&self) -> (Instant, u64) {
        (self.0.run_at, self.0.sequence)
    }
}

impl PartialEq for PendingJob {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingJob {}

impl PartialOrd for PendingJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PendingJobs {
    pub(crate) fn push(&mut self, job: Job) {
        self.heap.push(Reverse(PendingJob(job)));
    }

    /// Removes the earliest job if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<Job> {
        match self.heap.peek() {
            Some(Reverse(next)) if next.0.run_at <= now => {
                self.heap.pop().map(|Reverse(PendingJob(job))| job)
            }
            _ => None,
        }
    }

    /// Iterates in no particular order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Job> {
        self.heap.iter().map(|Reverse(PendingJob(job))| job)
    }
}
