//! Per-stage queue descriptors.
//!
//! | Queue | Priority | Attempts | Backoff | Concurrency |
//! |-------|----------|----------|---------|-------------|
//! | extraction | 10 | 2 | exponential 500 ms | N |
//! | summarization | 5 | 3 | exponential 1000 ms | N |
//! | tagging | 3 | 2 | exponential 500 ms | 2N |
//! | embedding | 1 | 3 | exponential 2000 ms | N |
//!
//! `N` is the configured worker count (`PROCESSING_WORKERS`).

use std::collections::BTreeMap;

use knowman_core::{defaults, Backoff, JobType, RetryPolicy};
use serde::Serialize;

/// Fixed configuration for one stage queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueDescriptor {
    pub queue: JobType,
    pub priority: i32,
    pub retry: RetryPolicy,
    /// Concurrent worker slots for this queue.
    pub concurrency: usize,
    pub retain_completed: usize,
    pub retain_failed: usize,
}

impl QueueDescriptor {
    /// Standard descriptor for `queue` with `workers` as the base concurrency.
    pub fn standard(queue: JobType, workers: usize) -> Self {
        let workers = workers.max(1);
        let (retry, concurrency) = match queue {
            JobType::Extraction => (RetryPolicy::exponential(2, 500), workers),
            JobType::Summarization => (RetryPolicy::exponential(3, 1000), workers),
            JobType::Tagging => (RetryPolicy::exponential(2, 500), workers * 2),
            JobType::Embedding => (RetryPolicy::exponential(3, 2000), workers),
        };
        Self {
            queue,
            priority: queue.default_priority(),
            retry,
            concurrency,
            retain_completed: defaults::RETAIN_COMPLETED,
            retain_failed: defaults::RETAIN_FAILED,
        }
    }
}

/// The four stage queues, keyed by job type.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSet {
    descriptors: BTreeMap<JobType, QueueDescriptor>,
}

impl QueueSet {
    pub fn standard(workers: usize) -> Self {
        let descriptors = JobType::ALL
            .iter()
            .map(|&queue| (queue, QueueDescriptor::standard(queue, workers)))
            .collect();
        Self { descriptors }
    }

    pub fn get(&self, queue: JobType) -> &QueueDescriptor {
        // Every JobType is inserted at construction and never removed.
        &self.descriptors[&queue]
    }

    pub fn priority(&self, queue: JobType) -> i32 {
        self.get(queue).priority
    }

    pub fn retry_policy(&self, queue: JobType) -> &RetryPolicy {
        &self.get(queue).retry
    }

    /// Descriptors in stage order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueDescriptor> {
        self.descriptors.values()
    }

    /// Override the backoff of one queue.
    pub fn with_backoff(mut self, queue: JobType, backoff: Backoff) -> Self {
        self.entry(queue).retry.backoff = backoff;
        self
    }

    /// Override the backoff of every queue.
    pub fn with_backoff_all(mut self, backoff: Backoff) -> Self {
        for descriptor in self.descriptors.values_mut() {
            descriptor.retry.backoff = backoff;
        }
        self
    }

    pub fn with_max_attempts(mut self, queue: JobType, max_attempts: u32) -> Self {
        self.entry(queue).retry.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_concurrency(mut self, queue: JobType, concurrency: usize) -> Self {
        self.entry(queue).concurrency = concurrency.max(1);
        self
    }

    /// Override how many finished job ids the broker keeps for one queue.
    pub fn with_retention(mut self, queue: JobType, completed: usize, failed: usize) -> Self {
        let descriptor = self.entry(queue);
        descriptor.retain_completed = completed;
        descriptor.retain_failed = failed;
        self
    }

    fn entry(&mut self, queue: JobType) -> &mut QueueDescriptor {
        self.descriptors
            .entry(queue)
            .or_insert_with(|| QueueDescriptor::standard(queue, defaults::PROCESSING_WORKERS))
    }
}

impl Default for QueueSet {
    fn default() -> Self {
        Self::standard(defaults::PROCESSING_WORKERS)
    }
}
