//! Capture, stage enqueueing and job administration.
//!
//! The orchestrator owns no state of its own. It creates job records in the
//! store, hands them to the broker, and answers the administrative queries
//! an HTTP layer would expose.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use knowman_core::{
    defaults, Broker, Error, EventBus, Job, JobFilter, JobPage, JobStatus, JobType,
    KnowledgeItem, PipelineEvent, QueueCounts, Result, StatusCount,
};
use knowman_inference::{ProviderResolver, ProviderStatus};

use crate::queue::QueueSet;
use crate::stages::{stage_handlers, ExtractionInput, StageDeps, TextInput};
use crate::store::Store;
use crate::worker::{WorkerBuilder, WorkerConfig};

// =============================================================================
// REQUEST / RESPONSE TYPES
// =============================================================================

/// A new knowledge item to capture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

impl CaptureRequest {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The captured item and the jobs queued for it.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub item: KnowledgeItem,
    pub jobs: Vec<Job>,
}

/// Which stages to enqueue. All enabled by default; extraction also needs
/// raw HTML on the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    pub extraction: bool,
    pub summarization: bool,
    pub tagging: bool,
    pub embedding: bool,
}

impl Default for StageFlags {
    fn default() -> Self {
        Self {
            extraction: true,
            summarization: true,
            tagging: true,
            embedding: true,
        }
    }
}

impl StageFlags {
    /// Only the given stages.
    pub fn only(stages: &[JobType]) -> Self {
        Self {
            extraction: stages.contains(&JobType::Extraction),
            summarization: stages.contains(&JobType::Summarization),
            tagging: stages.contains(&JobType::Tagging),
            embedding: stages.contains(&JobType::Embedding),
        }
    }

    pub fn includes(&self, stage: JobType) -> bool {
        match stage {
            JobType::Extraction => self.extraction,
            JobType::Summarization => self.summarization,
            JobType::Tagging => self.tagging,
            JobType::Embedding => self.embedding,
        }
    }
}

/// Totals across every job record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobTotals {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusOverview {
    pub status_counts: Vec<StatusCount>,
    pub recent_jobs: Vec<Job>,
    pub queue_stats: Vec<QueueCounts>,
    pub summary: JobTotals,
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

#[derive(Clone)]
pub struct Orchestrator {
    store: Store,
    broker: Arc<dyn Broker>,
    queues: QueueSet,
    providers: Arc<ProviderResolver>,
    events: EventBus,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        broker: Arc<dyn Broker>,
        queues: QueueSet,
        providers: Arc<ProviderResolver>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            broker,
            queues,
            providers,
            events,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }

    /// Worker builder wired with the stage handlers and this orchestrator's
    /// collaborators.
    pub fn worker_builder(&self, config: WorkerConfig) -> WorkerBuilder {
        let deps = StageDeps::new(
            self.store.clone(),
            Arc::clone(&self.providers),
            self.events.clone(),
        );
        WorkerBuilder::new(self.store.clone(), Arc::clone(&self.broker))
            .with_config(config)
            .with_queues(self.queues.clone())
            .with_events(self.events.clone())
            .with_handlers(stage_handlers(&deps))
    }

    /// Validate and store a new item, then enqueue its stages.
    #[instrument(skip(self, request), fields(subsystem = "jobs", component = "orchestrator", op = "capture", has_html = request.html.is_some()))]
    pub async fn capture(&self, request: CaptureRequest) -> Result<CaptureOutcome> {
        if request.title.trim().is_empty() {
            return Err(Error::InvalidInput("Title is required".into()));
        }
        if request.content.trim().is_empty() {
            return Err(Error::InvalidInput("Content is required".into()));
        }

        let item = KnowledgeItem::captured(
            request.title,
            &request.content,
            request.html,
            request.url,
            request.metadata,
        );
        let item = self.store.items.insert(item).await?;
        let jobs = self.enqueue_stages_for(&item, StageFlags::default()).await?;

        info!(
            item_id = %item.id,
            status = %item.status,
            job_count = jobs.len(),
            "Item captured"
        );
        Ok(CaptureOutcome { item, jobs })
    }

    /// Enqueue one job per enabled stage. Stages run independently; nothing
    /// waits for extraction.
    pub async fn enqueue_stages_for(
        &self,
        item: &KnowledgeItem,
        flags: StageFlags,
    ) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();

        if flags.extraction {
            if let Some(html) = &item.raw_content {
                let input = ExtractionInput {
                    html: html.clone(),
                    url: item.source_url.clone(),
                    title: Some(item.title.clone()),
                };
                jobs.push(self.enqueue(item.id, JobType::Extraction, to_json(&input)?).await?);
            }
        }

        for stage in [JobType::Summarization, JobType::Tagging, JobType::Embedding] {
            if !flags.includes(stage) {
                continue;
            }
            let input = TextInput {
                content: item.content.clone(),
                title: Some(item.title.clone()),
                existing_tags: if stage == JobType::Tagging {
                    item.tags.clone()
                } else {
                    Vec::new()
                },
            };
            jobs.push(self.enqueue(item.id, stage, to_json(&input)?).await?);
        }

        Ok(jobs)
    }

    async fn enqueue(&self, item_id: Uuid, job_type: JobType, input: JsonValue) -> Result<Job> {
        let priority = self.queues.priority(job_type);
        let job = self
            .store
            .jobs
            .insert(Job::new(item_id, job_type, priority, input))
            .await?;
        self.broker
            .enqueue(job_type, job.id, job.input.clone(), priority)
            .await?;

        debug!(job_id = %job.id, job_type = %job_type, item_id = %item_id, priority, "Job queued");
        self.events.emit(PipelineEvent::JobQueued {
            job_id: job.id,
            job_type,
            item_id,
            priority,
        });
        Ok(job)
    }

    /// Put a failed job back on its queue with its stored input.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "orchestrator", op = "retry"))]
    pub async fn retry(&self, job_id: Uuid) -> Result<Job> {
        let job = self.store.jobs.reset_for_retry(job_id).await?;
        self.broker
            .enqueue(job.job_type, job.id, job.input.clone(), job.priority)
            .await?;

        info!(job_type = %job.job_type, item_id = %job.knowledge_item_id, "Job re-queued for retry");
        self.events.emit(PipelineEvent::JobQueued {
            job_id: job.id,
            job_type: job.job_type,
            item_id: job.knowledge_item_id,
            priority: job.priority,
        });
        Ok(job)
    }

    /// Cancel a pending job.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "orchestrator", op = "cancel"))]
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job> {
        let job = self.store.jobs.cancel(job_id).await?;
        let removed = self.broker.remove(job.job_type, job.id).await?;
        if !removed {
            // Already handed to a worker; it will see the cancelled record.
            debug!("Cancelled job was not waiting in the broker");
        }

        info!(job_type = %job.job_type, item_id = %job.knowledge_item_id, "Job cancelled");
        self.events.emit(PipelineEvent::JobCancelled {
            job_id: job.id,
            job_type: job.job_type,
            item_id: job.knowledge_item_id,
        });
        Ok(job)
    }

    /// Re-run stages from the item's current state.
    #[instrument(skip(self, flags), fields(subsystem = "jobs", component = "orchestrator", op = "reprocess"))]
    pub async fn reprocess(&self, item_id: Uuid, flags: StageFlags) -> Result<Vec<Job>> {
        let item = self.get_item(item_id).await?;
        let jobs = self.enqueue_stages_for(&item, flags).await?;
        info!(job_count = jobs.len(), "Item queued for reprocessing");
        Ok(jobs)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.store
            .jobs
            .get(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<JobPage> {
        self.store.jobs.list(filter).await
    }

    pub async fn get_item(&self, item_id: Uuid) -> Result<KnowledgeItem> {
        self.store
            .items
            .get(item_id)
            .await?
            .ok_or(Error::ItemNotFound(item_id))
    }

    pub async fn jobs_for_item(&self, item_id: Uuid) -> Result<Vec<Job>> {
        self.store.jobs.for_item(item_id).await
    }

    /// Broker counts for every queue, in stage order.
    pub async fn queue_counts(&self) -> Result<Vec<QueueCounts>> {
        try_join_all(JobType::ALL.iter().map(|&queue| self.broker.counts(queue))).await
    }

    pub async fn status_overview(&self) -> Result<StatusOverview> {
        let status_counts = self.store.jobs.status_counts().await?;
        let recent_jobs = self.store.jobs.recent(defaults::RECENT_JOBS).await?;
        let queue_stats = self.queue_counts().await?;

        let mut summary = JobTotals::default();
        for row in &status_counts {
            summary.total += row.count;
            match row.status {
                JobStatus::Pending => summary.pending += row.count,
                JobStatus::Processing => summary.processing += row.count,
                JobStatus::Failed => summary.failed += row.count,
                JobStatus::Completed => {}
            }
        }

        Ok(StatusOverview {
            status_counts,
            recent_jobs,
            queue_stats,
            summary,
        })
    }

    /// Jobs that are not yet terminal.
    pub async fn outstanding(&self) -> Result<usize> {
        let overview = self.store.jobs.status_counts().await?;
        Ok(overview
            .iter()
            .filter(|row| !row.status.is_terminal())
            .map(|row| row.count)
            .sum())
    }

    /// Delete terminal job records older than `older_than_days`.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "orchestrator", op = "cleanup"))]
    pub async fn cleanup(&self, older_than_days: i64) -> Result<u64> {
        if older_than_days < 0 {
            return Err(Error::InvalidInput(format!(
                "older_than_days must not be negative, got {}",
                older_than_days
            )));
        }
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days);
        let removed = self.store.jobs.delete_terminal_before(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "Old jobs cleaned up");
        } else {
            debug!(%cutoff, "No jobs to clean up");
        }
        Ok(removed)
    }

    pub async fn provider_status(&self, for_embeddings: bool) -> ProviderStatus {
        let status = self.providers.provider_status(for_embeddings).await;
        if !status.health {
            warn!(
                subsystem = "jobs",
                component = "orchestrator",
                provider = %status.provider,
                testing = %status.testing,
                "Provider health check failed"
            );
        }
        status
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue> {
    serde_json::to_value(value).map_err(Error::from)
}
