//! Collaborator traits for the pipeline.
//!
//! The durable store and the queue broker are external services. These
//! traits are the contracts the workers and the orchestrator program
//! against; `knowman-jobs` ships in-memory implementations of each.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// STORE TRAITS
// =============================================================================

/// Repository for processing job records.
///
/// State-changing methods apply the [`Job`] state machine to the stored
/// record and return the updated copy. A missing record is
/// [`Error::JobNotFound`](crate::Error::JobNotFound); a rejected transition
/// is [`Error::InvalidTransition`](crate::Error::InvalidTransition) and
/// leaves the record unchanged.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Store a new job record.
    async fn insert(&self, job: Job) -> Result<Job>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Mark job as processing and count one attempt.
    async fn start(&self, job_id: Uuid) -> Result<Job>;

    /// Mark job as completed with its output.
    async fn complete(&self, job_id: Uuid, output: JsonValue) -> Result<Job>;

    /// Mark job as failed.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<Job>;

    /// Cancel a pending job.
    async fn cancel(&self, job_id: Uuid) -> Result<Job>;

    /// Reset a failed job to pending for an explicit retry.
    async fn reset_for_retry(&self, job_id: Uuid) -> Result<Job>;

    /// List jobs matching the filter, newest first.
    async fn list(&self, filter: &JobFilter) -> Result<JobPage>;

    /// Job counts grouped by (status, type). Empty groups are omitted.
    async fn status_counts(&self) -> Result<Vec<StatusCount>>;

    /// Most recently created jobs.
    async fn recent(&self, limit: usize) -> Result<Vec<Job>>;

    /// All jobs for one knowledge item, oldest first.
    async fn for_item(&self, item_id: Uuid) -> Result<Vec<Job>>;

    /// Delete terminal jobs that completed before `cutoff`. Returns the
    /// number of records removed.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Repository for knowledge items.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn insert(&self, item: KnowledgeItem) -> Result<KnowledgeItem>;

    async fn get(&self, item_id: Uuid) -> Result<Option<KnowledgeItem>>;

    /// Apply a stage patch as one keyed read-modify-write.
    ///
    /// Returns the updated item and the tags newly attached by the patch.
    async fn apply_patch(
        &self,
        item_id: Uuid,
        patch: &ItemPatch,
    ) -> Result<(KnowledgeItem, Vec<String>)>;
}

/// Repository for tag usage.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Increment the usage count of each tag, creating missing tags.
    async fn record_usage(&self, tags: &[String]) -> Result<()>;

    async fn get(&self, name: &str) -> Result<Option<Tag>>;

    /// All tags, most used first.
    async fn list(&self) -> Result<Vec<Tag>>;
}

// =============================================================================
// BROKER TRAIT
// =============================================================================

/// Queue service that stores pending work and delivers it to workers.
///
/// Within one queue, ready deliveries are handed out by priority (higher
/// first) and then arrival order. Retries are scheduled by the broker
/// according to the policy passed to [`Broker::fail`].
#[async_trait]
pub trait Broker: Send + Sync {
    /// Add a job to a queue.
    async fn enqueue(
        &self,
        queue: JobType,
        job_id: Uuid,
        payload: JsonValue,
        priority: i32,
    ) -> Result<()>;

    /// Take the next ready delivery, waiting up to `wait` for one to arrive.
    async fn dequeue(&self, queue: JobType, wait: Duration) -> Result<Option<Delivery>>;

    /// Acknowledge a successfully handled delivery.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Report a failed delivery.
    ///
    /// With a policy that still allows attempts the job is scheduled again
    /// after the policy's backoff. `None` marks the failure as permanent.
    async fn fail(
        &self,
        delivery: &Delivery,
        error: &str,
        policy: Option<&RetryPolicy>,
    ) -> Result<FailOutcome>;

    /// Remove a waiting or delayed job. Returns whether it was found.
    async fn remove(&self, queue: JobType, job_id: Uuid) -> Result<bool>;

    async fn counts(&self, queue: JobType) -> Result<QueueCounts>;
}
