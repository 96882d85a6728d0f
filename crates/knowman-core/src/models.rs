//! Core data models for the knowman pipeline.
//!
//! These types are shared across all knowman crates: knowledge items and the
//! field-scoped patches stages apply to them, job records and their state
//! machine, and the queue/broker vocabulary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// KNOWLEDGE ITEMS
// =============================================================================

/// Where a knowledge item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Webpage,
    Document,
}

/// Lifecycle status of a knowledge item.
///
/// The pipeline only moves an item forward through
/// `captured → processing → processed`. `archived` and `deleted` are set
/// externally and are never left by a stage update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Captured,
    Processing,
    Processed,
    Archived,
    Deleted,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Captured => "captured",
            ItemStatus::Processing => "processing",
            ItemStatus::Processed => "processed",
            ItemStatus::Archived => "archived",
            ItemStatus::Deleted => "deleted",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ItemStatus::Captured => 0,
            ItemStatus::Processing => 1,
            ItemStatus::Processed => 2,
            ItemStatus::Archived | ItemStatus::Deleted => u8::MAX,
        }
    }

    /// Returns `target` when it is strictly ahead of `self` in the pipeline
    /// lifecycle, otherwise `self` unchanged.
    pub fn advance_to(self, target: ItemStatus) -> ItemStatus {
        if target.rank() > self.rank() && target.rank() != u8::MAX {
            target
        } else {
            self
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured piece of content being enriched by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: Uuid,
    pub source_type: SourceType,
    pub source_url: Option<String>,
    pub title: String,
    pub content: String,
    /// Original HTML, when the capture carried any.
    pub raw_content: Option<String>,
    pub summary: Option<String>,
    /// Ordered, deduplicated, display order preserved.
    pub tags: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub importance_score: f32,
    pub readability_score: f32,
    pub metadata: JsonValue,
    pub status: ItemStatus,
    pub capture_date: DateTime<Utc>,
    pub processed_date: Option<DateTime<Utc>>,
}

impl KnowledgeItem {
    /// Build a freshly captured item with capture-time defaults applied.
    ///
    /// Content is cut to [`defaults::CAPTURE_CONTENT_LIMIT`] characters. The
    /// item starts `captured` when HTML is present (extraction will run)
    /// and `processing` otherwise.
    pub fn captured(
        title: impl Into<String>,
        content: &str,
        html: Option<String>,
        url: Option<String>,
        metadata: Option<JsonValue>,
    ) -> Self {
        let status = if html.is_some() {
            ItemStatus::Captured
        } else {
            ItemStatus::Processing
        };
        Self {
            id: Uuid::now_v7(),
            source_type: if url.is_some() {
                SourceType::Webpage
            } else {
                SourceType::Document
            },
            source_url: url,
            title: title.into(),
            content: truncate_chars(content, defaults::CAPTURE_CONTENT_LIMIT),
            raw_content: html,
            summary: None,
            tags: Vec::new(),
            embedding: None,
            importance_score: defaults::INITIAL_IMPORTANCE_SCORE,
            readability_score: defaults::INITIAL_READABILITY_SCORE,
            metadata: metadata.unwrap_or_else(|| JsonValue::Object(Default::default())),
            status,
            capture_date: Utc::now(),
            processed_date: None,
        }
    }
}

/// Cut `s` to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Union `incoming` into `existing`, keeping first-appearance order and
/// dropping duplicates. Returns the merged list and the tags that were not
/// already present.
pub fn union_tags(existing: &[String], incoming: &[String]) -> (Vec<String>, Vec<String>) {
    let mut merged: Vec<String> = Vec::with_capacity(existing.len() + incoming.len());
    for tag in existing {
        if !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    let mut added = Vec::new();
    for tag in incoming {
        if !merged.contains(tag) {
            merged.push(tag.clone());
            added.push(tag.clone());
        }
    }
    (merged, added)
}

/// How a stage's output is combined with the item's current field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Overwrite the stage's fields.
    Replace,
    /// Union the stage's list field with the current one.
    UnionSet,
}

/// Field-scoped update produced by one stage.
///
/// Each variant touches only the fields its stage owns, so stages running
/// concurrently against the same item never overwrite each other.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemPatch {
    Extraction {
        title: Option<String>,
        content: String,
        raw_content: Option<String>,
        readability_score: f32,
    },
    Summary {
        summary: String,
    },
    Tags {
        tags: Vec<String>,
    },
    Embedding {
        vector: Vec<f32>,
    },
}

impl ItemPatch {
    pub fn merge_strategy(&self) -> MergeStrategy {
        match self {
            ItemPatch::Tags { .. } => MergeStrategy::UnionSet,
            _ => MergeStrategy::Replace,
        }
    }

    pub fn stage(&self) -> JobType {
        match self {
            ItemPatch::Extraction { .. } => JobType::Extraction,
            ItemPatch::Summary { .. } => JobType::Summarization,
            ItemPatch::Tags { .. } => JobType::Tagging,
            ItemPatch::Embedding { .. } => JobType::Embedding,
        }
    }

    /// Apply the patch in place and return the tags newly attached to the
    /// item (empty for every patch except [`ItemPatch::Tags`]).
    pub fn apply_to(&self, item: &mut KnowledgeItem) -> Vec<String> {
        let mut added = Vec::new();
        match self {
            ItemPatch::Extraction {
                title,
                content,
                raw_content,
                readability_score,
            } => {
                if let Some(title) = title.as_ref().filter(|t| !t.trim().is_empty()) {
                    item.title = title.clone();
                }
                item.content = content.clone();
                if raw_content.is_some() {
                    item.raw_content = raw_content.clone();
                }
                item.readability_score = readability_score.clamp(0.0, 1.0);
                if item.status == ItemStatus::Captured {
                    item.status = ItemStatus::Processing;
                }
            }
            ItemPatch::Summary { summary } => {
                item.summary = Some(summary.clone());
                item.status = item.status.advance_to(ItemStatus::Processed);
            }
            ItemPatch::Tags { tags } => {
                let (merged, new_tags) = union_tags(&item.tags, tags);
                item.tags = merged;
                added = new_tags;
                if item.status == ItemStatus::Captured {
                    item.status = ItemStatus::Processed;
                }
            }
            ItemPatch::Embedding { vector } => {
                item.embedding = Some(vector.clone());
                if item.status == ItemStatus::Captured {
                    item.status = ItemStatus::Processed;
                }
            }
        }
        item.processed_date = Some(Utc::now());
        added
    }
}

/// A tag known to the system, with the number of items it was attached to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// JOB TYPES
// =============================================================================

/// Pipeline stage a job runs. Each stage has its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Extract readable text and title from captured HTML
    Extraction,
    /// Generate a short summary
    Summarization,
    /// Generate descriptive tags
    Tagging,
    /// Compute the embedding vector
    Embedding,
}

impl JobType {
    /// All stages in enqueue order.
    pub const ALL: [JobType; 4] = [
        JobType::Extraction,
        JobType::Summarization,
        JobType::Tagging,
        JobType::Embedding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Extraction => "extraction",
            JobType::Summarization => "summarization",
            JobType::Tagging => "tagging",
            JobType::Embedding => "embedding",
        }
    }

    /// Default priority for this job type (higher = more urgent)
    pub fn default_priority(&self) -> i32 {
        match self {
            // Extraction refreshes the content later stages read
            JobType::Extraction => 10,
            JobType::Summarization => 5,
            JobType::Tagging => 3,
            JobType::Embedding => 1,
        }
    }

    pub fn merge_strategy(&self) -> MergeStrategy {
        match self {
            JobType::Tagging => MergeStrategy::UnionSet,
            _ => MergeStrategy::Replace,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "extraction" => Ok(JobType::Extraction),
            "summarization" => Ok(JobType::Summarization),
            "tagging" => Ok(JobType::Tagging),
            "embedding" => Ok(JobType::Embedding),
            other => Err(Error::InvalidInput(format!("Unknown job type: {}", other))),
        }
    }
}

/// Job record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("Unknown job status: {}", other))),
        }
    }
}

// =============================================================================
// JOB RECORDS
// =============================================================================

/// Durable record of one stage run for one knowledge item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub knowledge_item_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    /// Executions started so far.
    pub attempts: u32,
    /// Self-contained stage input.
    pub input: JsonValue,
    /// Present only when completed.
    pub output: Option<JsonValue>,
    /// Present only when failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(knowledge_item_id: Uuid, job_type: JobType, priority: i32, input: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            knowledge_item_id,
            job_type,
            status: JobStatus::Pending,
            priority,
            attempts: 0,
            input,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    fn reject(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            job_id: self.id,
            from: self.status,
            action,
        }
    }

    /// `pending → processing`, or `processing → processing` on redelivery
    /// after a backoff. Counts one attempt.
    pub fn start(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Pending | JobStatus::Processing => {
                let now = Utc::now();
                self.status = JobStatus::Processing;
                self.attempts += 1;
                self.started_at = Some(now);
                self.completed_at = None;
                self.updated_at = now;
                Ok(())
            }
            _ => Err(self.reject("start")),
        }
    }

    /// `processing → completed`.
    pub fn complete(&mut self, output: JsonValue) -> Result<()> {
        if self.status != JobStatus::Processing {
            return Err(self.reject("complete"));
        }
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `processing → failed`.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        if self.status != JobStatus::Processing {
            return Err(self.reject("fail"));
        }
        self.mark_failed(error.into());
        Ok(())
    }

    /// `pending → failed` with the fixed cancellation message.
    pub fn cancel(&mut self) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(self.reject("cancel"));
        }
        self.mark_failed(defaults::CANCELLED_MESSAGE.to_string());
        Ok(())
    }

    /// `failed → pending` by explicit retry. Resets the attempt counter.
    pub fn reset_for_retry(&mut self) -> Result<()> {
        if self.status != JobStatus::Failed {
            return Err(self.reject("retry"));
        }
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.error = None;
        self.output = None;
        self.started_at = None;
        self.completed_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn mark_failed(&mut self, error: String) {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.output = None;
        self.error = Some(error);
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

/// Filter for job listings. Results are newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub knowledge_item_id: Option<Uuid>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            job_type: None,
            knowledge_item_id: None,
            limit: defaults::JOB_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl JobFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn for_item(mut self, item_id: Uuid) -> Self {
        self.knowledge_item_id = Some(item_id);
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.job_type.map_or(true, |t| job.job_type == t)
            && self
                .knowledge_item_id
                .map_or(true, |id| job.knowledge_item_id == id)
    }
}

/// One page of a job listing.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

/// Job count for one (status, type) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: JobStatus,
    pub job_type: JobType,
    pub count: usize,
}

// =============================================================================
// QUEUES AND DELIVERIES
// =============================================================================

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64 },
}

/// Per-queue retry policy applied by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executions allowed, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base_ms },
        }
    }

    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay_ms },
        }
    }

    /// Whether another attempt may run after `failed_attempts` failures.
    pub fn allows_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }

    /// Delay before the next attempt after `failed_attempts` failures.
    ///
    /// Exponential backoff is `base × 2^(k-1)` for `k` failures.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms } => {
                let exp = failed_attempts.saturating_sub(1).min(32);
                Duration::from_millis(base_ms.saturating_mul(1u64 << exp))
            }
        }
    }
}

/// A job handed to a worker by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub queue: JobType,
    pub job_id: Uuid,
    pub payload: JsonValue,
    pub priority: i32,
    /// 1-based delivery attempt within the current broker lifetime of the job.
    pub attempt: u32,
}

/// What the broker did with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled again; `attempt` is the number of the upcoming attempt.
    Retrying { attempt: u32, delay: Duration },
    /// No attempts left, or the failure was permanent.
    Exhausted,
}

/// Broker-side counts for one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    #[serde(rename = "name")]
    pub queue: JobType,
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

impl QueueCounts {
    pub fn empty(queue: JobType) -> Self {
        Self {
            queue,
            waiting: 0,
            active: 0,
            completed: 0,
            failed: 0,
            delayed: 0,
        }
    }
}
