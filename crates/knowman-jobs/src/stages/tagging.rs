use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument};

use knowman_core::{ItemPatch, JobType, Result};
use knowman_inference::{AiProvider, TaggingRequest};

use super::{StageDeps, TextInput};
use crate::handler::{JobContext, JobHandler, JobResult};

/// Generates tags and unions them into the item's tag list.
pub struct TaggingHandler {
    deps: StageDeps,
}

impl TaggingHandler {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, ctx: &JobContext) -> Result<JsonValue> {
        let input: TextInput = ctx.parse_input()?;
        let provider = self.deps.providers.main();

        let mut request =
            TaggingRequest::new(input.content).with_existing_tags(input.existing_tags);
        if let Some(title) = input.title {
            request = request.with_title(title);
        }
        let response = provider.generate_tags(&request).await?;

        let patch = ItemPatch::Tags {
            tags: response.tags.clone(),
        };
        let (item, added) = self.deps.persist(ctx.item_id(), &patch).await?;
        self.deps.store.tags.record_usage(&added).await?;

        info!(
            item_id = %item.id,
            model = %response.model,
            tags = %item.tags.join(", "),
            new_tags = added.len(),
            "Tagging completed"
        );

        Ok(json!({
            "tags": item.tags,
            "model": response.model,
        }))
    }
}

#[async_trait]
impl JobHandler for TaggingHandler {
    fn job_type(&self) -> JobType {
        JobType::Tagging
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "tagging", op = "execute", job_id = %ctx.job_id()))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        self.run(&ctx).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support;
    use knowman_core::KnowledgeItem;

    #[tokio::test]
    async fn test_offline_tags_and_usage() {
        let deps = test_support::deps();
        let item = test_support::captured(
            &deps,
            KnowledgeItem::captured("T", "Hello. World. Foo. Bar.", None, None, None),
        )
        .await;

        let handler = TaggingHandler::new(deps.clone());
        let ctx = test_support::context(
            item.id,
            JobType::Tagging,
            json!({"content": "Hello. World. Foo. Bar.", "title": "T"}),
        );
        let result = handler.execute(ctx).await;
        assert_eq!(
            result,
            JobResult::Success(json!({"tags": ["hello", "world"], "model": "mock-tagger"}))
        );

        let tag = deps.store.tags.get("hello").await.unwrap().unwrap();
        assert_eq!(tag.usage_count, 1);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let deps = test_support::deps();
        let item = test_support::captured(
            &deps,
            KnowledgeItem::captured("Rust", "Rust async runtime", None, None, None),
        )
        .await;
        let handler = TaggingHandler::new(deps.clone());
        let input = json!({"content": "Rust async runtime", "title": "Rust"});

        for _ in 0..2 {
            let ctx = test_support::context(item.id, JobType::Tagging, input.clone());
            assert!(matches!(handler.execute(ctx).await, JobResult::Success(_)));
        }

        let item = deps.store.items.get(item.id).await.unwrap().unwrap();
        assert_eq!(item.tags, vec!["rust", "async", "runtime"]);
        // Usage counts once per item, not per run.
        assert_eq!(deps.store.tags.get("rust").await.unwrap().unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn test_existing_tags_come_first() {
        let deps = test_support::deps();
        let item = test_support::captured(
            &deps,
            KnowledgeItem::captured("T", "Tokio runtime", None, None, None),
        )
        .await;
        let handler = TaggingHandler::new(deps.clone());
        let ctx = test_support::context(
            item.id,
            JobType::Tagging,
            json!({"content": "Tokio runtime", "title": "T", "existingTags": ["pinned"]}),
        );
        assert!(matches!(handler.execute(ctx).await, JobResult::Success(_)));

        let item = deps.store.items.get(item.id).await.unwrap().unwrap();
        assert_eq!(item.tags, vec!["pinned", "tokio", "runtime"]);
    }
}
