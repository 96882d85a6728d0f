//! In-memory job, item and tag repositories.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use uuid::Uuid;

use knowman_core::{
    Error, ItemPatch, ItemRepository, Job, JobFilter, JobPage, JobRepository, JobStatus, JobType,
    KnowledgeItem, Result, StatusCount, Tag, TagRepository,
};

/// Repository bundle shared by the workers, stage handlers and orchestrator.
#[derive(Clone)]
pub struct Store {
    pub jobs: Arc<dyn JobRepository>,
    pub items: Arc<dyn ItemRepository>,
    pub tags: Arc<dyn TagRepository>,
}

impl Store {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        items: Arc<dyn ItemRepository>,
        tags: Arc<dyn TagRepository>,
    ) -> Self {
        Self { jobs, items, tags }
    }

    /// Store backed by the in-memory repositories.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryJobRepository::default()),
            Arc::new(MemoryItemRepository::default()),
            Arc::new(MemoryTagRepository::default()),
        )
    }
}

// =============================================================================
// JOBS
// =============================================================================

#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobRepository {
    /// Apply a state-machine transition to one stored record.
    async fn transition<F>(&self, job_id: Uuid, apply: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()> + Send,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;
        // Work on a copy so a rejected transition leaves the record untouched.
        let mut updated = job.clone();
        apply(&mut updated)?;
        *job = updated.clone();
        Ok(updated)
    }
}

fn newest_first(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn insert(&self, job: Job) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(Error::InvalidInput(format!("Job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn start(&self, job_id: Uuid) -> Result<Job> {
        self.transition(job_id, |job| job.start()).await
    }

    async fn complete(&self, job_id: Uuid, output: JsonValue) -> Result<Job> {
        self.transition(job_id, move |job| job.complete(output)).await
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<Job> {
        let error = error.to_string();
        self.transition(job_id, move |job| job.fail(error)).await
    }

    async fn cancel(&self, job_id: Uuid) -> Result<Job> {
        self.transition(job_id, |job| job.cancel()).await
    }

    async fn reset_for_retry(&self, job_id: Uuid) -> Result<Job> {
        self.transition(job_id, |job| job.reset_for_retry()).await
    }

    async fn list(&self, filter: &JobFilter) -> Result<JobPage> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<&Job> = jobs.values().filter(|job| filter.matches(job)).collect();
        matching.sort_by(|a, b| newest_first(a, b));

        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect();

        Ok(JobPage {
            jobs: page,
            total,
            limit: filter.limit,
            offset: filter.offset,
            has_more: filter.offset + filter.limit < total,
        })
    }

    async fn status_counts(&self) -> Result<Vec<StatusCount>> {
        let jobs = self.jobs.read().await;
        let mut counts: HashMap<(JobStatus, JobType), usize> = HashMap::new();
        for job in jobs.values() {
            *counts.entry((job.status, job.job_type)).or_default() += 1;
        }

        let mut out = Vec::with_capacity(counts.len());
        for status in JobStatus::ALL {
            for job_type in JobType::ALL {
                if let Some(&count) = counts.get(&(status, job_type)) {
                    out.push(StatusCount {
                        status,
                        job_type,
                        count,
                    });
                }
            }
        }
        Ok(out)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<&Job> = jobs.values().collect();
        all.sort_by(|a, b| newest_first(a, b));
        Ok(all.into_iter().take(limit).cloned().collect())
    }

    async fn for_item(&self, item_id: Uuid) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|job| job.knowledge_item_id == item_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| newest_first(b, a));
        Ok(matching)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - jobs.len()) as u64)
    }
}

// =============================================================================
// ITEMS
// =============================================================================

#[derive(Default)]
pub struct MemoryItemRepository {
    items: RwLock<HashMap<Uuid, KnowledgeItem>>,
}

#[async_trait]
impl ItemRepository for MemoryItemRepository {
    async fn insert(&self, item: KnowledgeItem) -> Result<KnowledgeItem> {
        let mut items = self.items.write().await;
        if items.contains_key(&item.id) {
            return Err(Error::InvalidInput(format!(
                "Knowledge item {} already exists",
                item.id
            )));
        }
        items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get(&self, item_id: Uuid) -> Result<Option<KnowledgeItem>> {
        Ok(self.items.read().await.get(&item_id).cloned())
    }

    async fn apply_patch(
        &self,
        item_id: Uuid,
        patch: &ItemPatch,
    ) -> Result<(KnowledgeItem, Vec<String>)> {
        let mut items = self.items.write().await;
        let item = items.get_mut(&item_id).ok_or(Error::ItemNotFound(item_id))?;
        let added = patch.apply_to(item);
        Ok((item.clone(), added))
    }
}

// =============================================================================
// TAGS
// =============================================================================

#[derive(Default)]
pub struct MemoryTagRepository {
    tags: RwLock<HashMap<String, Tag>>,
}

#[async_trait]
impl TagRepository for MemoryTagRepository {
    async fn record_usage(&self, names: &[String]) -> Result<()> {
        let mut tags = self.tags.write().await;
        let now = Utc::now();
        for name in names {
            let tag = tags.entry(name.clone()).or_insert_with(|| Tag {
                name: name.clone(),
                usage_count: 0,
                created_at: now,
                updated_at: now,
            });
            tag.usage_count += 1;
            tag.updated_at = now;
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Tag>> {
        Ok(self.tags.read().await.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<Tag>> {
        let tags = self.tags.read().await;
        let mut all: Vec<Tag> = tags.values().cloned().collect();
        all.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use knowman_core::ItemStatus;
    use serde_json::json;

    fn job(item_id: Uuid, job_type: JobType) -> Job {
        Job::new(item_id, job_type, job_type.default_priority(), json!({}))
    }

    #[tokio::test]
    async fn test_insert_and_transitions() {
        let repo = MemoryJobRepository::default();
        let item_id = Uuid::now_v7();
        let inserted = repo.insert(job(item_id, JobType::Tagging)).await.unwrap();

        let started = repo.start(inserted.id).await.unwrap();
        assert_eq!(started.status, JobStatus::Processing);
        assert_eq!(started.attempts, 1);

        let done = repo.complete(inserted.id, json!({"tags": []})).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(repo.get(inserted.id).await.unwrap().unwrap(), done);
    }

    #[tokio::test]
    async fn test_rejected_transition_leaves_record() {
        let repo = MemoryJobRepository::default();
        let inserted = repo
            .insert(job(Uuid::now_v7(), JobType::Embedding))
            .await
            .unwrap();

        let err = repo.complete(inserted.id, json!({})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(repo.get(inserted.id).await.unwrap().unwrap(), inserted);
    }

    #[tokio::test]
    async fn test_missing_job() {
        let repo = MemoryJobRepository::default();
        let id = Uuid::now_v7();
        assert!(matches!(
            repo.start(id).await.unwrap_err(),
            Error::JobNotFound(missing) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let repo = MemoryJobRepository::default();
        let record = job(Uuid::now_v7(), JobType::Embedding);
        repo.insert(record.clone()).await.unwrap();
        assert!(repo.insert(record).await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let repo = MemoryJobRepository::default();
        let item_a = Uuid::now_v7();
        let item_b = Uuid::now_v7();
        for job_type in [JobType::Summarization, JobType::Tagging, JobType::Embedding] {
            repo.insert(job(item_a, job_type)).await.unwrap();
        }
        repo.insert(job(item_b, JobType::Summarization)).await.unwrap();

        let page = repo
            .list(&JobFilter::default().with_job_type(JobType::Summarization))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(!page.has_more);

        let page = repo
            .list(&JobFilter::default().for_item(item_a).with_page(2, 0))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.jobs.len(), 2);
        assert!(page.has_more);
        assert!(page.jobs[0].created_at >= page.jobs[1].created_at);

        let page = repo
            .list(&JobFilter::default().for_item(item_a).with_page(2, 2))
            .await
            .unwrap();
        assert_eq!(page.jobs.len(), 1);
        assert!(!page.has_more);

        let page = repo
            .list(&JobFilter::default().with_status(JobStatus::Failed))
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_status_counts_grouped() {
        let repo = MemoryJobRepository::default();
        let item = Uuid::now_v7();
        let a = repo.insert(job(item, JobType::Tagging)).await.unwrap();
        repo.insert(job(item, JobType::Tagging)).await.unwrap();
        repo.insert(job(item, JobType::Embedding)).await.unwrap();
        repo.start(a.id).await.unwrap();

        let counts = repo.status_counts().await.unwrap();
        assert_eq!(
            counts,
            vec![
                StatusCount {
                    status: JobStatus::Pending,
                    job_type: JobType::Tagging,
                    count: 1
                },
                StatusCount {
                    status: JobStatus::Pending,
                    job_type: JobType::Embedding,
                    count: 1
                },
                StatusCount {
                    status: JobStatus::Processing,
                    job_type: JobType::Tagging,
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_terminal_before_cutoff() {
        let repo = MemoryJobRepository::default();
        let item = Uuid::now_v7();
        let done = repo.insert(job(item, JobType::Tagging)).await.unwrap();
        let pending = repo.insert(job(item, JobType::Embedding)).await.unwrap();
        repo.start(done.id).await.unwrap();
        repo.complete(done.id, json!({})).await.unwrap();

        let removed = repo
            .delete_terminal_before(Utc::now() - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = repo
            .delete_terminal_before(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(done.id).await.unwrap().is_none());
        assert!(repo.get(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_apply_patch_returns_added_tags() {
        let repo = MemoryItemRepository::default();
        let mut item = KnowledgeItem::captured("T", "body", None, None, None);
        item.tags = vec!["rust".to_string()];
        let item = repo.insert(item).await.unwrap();

        let (updated, added) = repo
            .apply_patch(
                item.id,
                &ItemPatch::Tags {
                    tags: vec!["rust".to_string(), "async".to_string()],
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.tags, vec!["rust", "async"]);
        assert_eq!(added, vec!["async"]);
        assert_eq!(updated.status, ItemStatus::Processing);
    }

    #[tokio::test]
    async fn test_apply_patch_missing_item() {
        let repo = MemoryItemRepository::default();
        let id = Uuid::now_v7();
        let err = repo
            .apply_patch(id, &ItemPatch::Summary { summary: "s".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ItemNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_tag_usage_counts() {
        let repo = MemoryTagRepository::default();
        repo.record_usage(&["rust".into(), "tokio".into()])
            .await
            .unwrap();
        repo.record_usage(&["rust".into()]).await.unwrap();

        assert_eq!(repo.get("rust").await.unwrap().unwrap().usage_count, 2);
        let names: Vec<String> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["rust", "tokio"]);
        assert!(repo.get("missing").await.unwrap().is_none());
    }
}
