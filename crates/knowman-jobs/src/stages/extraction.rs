use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument};

use knowman_core::{defaults, truncate_chars, ItemPatch, JobType, Result};

use super::{ExtractionInput, StageDeps};
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::html::{extract_page, readability_score};

/// Turns captured HTML into readable content and a readability score.
pub struct ExtractionHandler {
    deps: StageDeps,
}

impl ExtractionHandler {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, ctx: &JobContext) -> Result<JsonValue> {
        let input: ExtractionInput = ctx.parse_input()?;

        let page = extract_page(&input.html);
        let content = truncate_chars(&page.text, defaults::MAX_CONTENT_LENGTH);
        let readability = readability_score(&content);
        let title = page.title.or(input.title).filter(|t| !t.trim().is_empty());

        let patch = ItemPatch::Extraction {
            title: title.clone(),
            content: content.clone(),
            raw_content: Some(input.html),
            readability_score: readability,
        };
        let (item, _) = self.deps.persist(ctx.item_id(), &patch).await?;

        info!(
            item_id = %item.id,
            content_length = content.chars().count(),
            readability_score = readability,
            "Extraction completed"
        );

        Ok(json!({
            "contentLength": content.chars().count(),
            "title": title.unwrap_or_default(),
            "readabilityScore": readability,
        }))
    }
}

#[async_trait]
impl JobHandler for ExtractionHandler {
    fn job_type(&self) -> JobType {
        JobType::Extraction
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "extraction", op = "execute", job_id = %ctx.job_id()))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        self.run(&ctx).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support;
    use knowman_core::{ItemStatus, KnowledgeItem};

    #[tokio::test]
    async fn test_extracts_article_and_updates_item() {
        let deps = test_support::deps();
        let html = "<html><head><title>Real Title</title></head><body>\
                    <article><p>Rust is fast.</p><p>Tokio is async.</p></article></body></html>";
        let item = test_support::captured(
            &deps,
            KnowledgeItem::captured("Placeholder", "raw", Some(html.to_string()), None, None),
        )
        .await;
        assert_eq!(item.status, ItemStatus::Captured);

        let handler = ExtractionHandler::new(deps.clone());
        let ctx = test_support::context(
            item.id,
            JobType::Extraction,
            json!({"html": html, "url": "", "title": "Placeholder"}),
        );
        let result = handler.execute(ctx).await;

        let output = match result {
            JobResult::Success(output) => output,
            other => panic!("unexpected result {:?}", other),
        };
        assert_eq!(output["title"], "Real Title");
        assert_eq!(output["contentLength"], 29);
        assert_eq!(output["readabilityScore"], json!(0.8f32));

        let item = deps.store.items.get(item.id).await.unwrap().unwrap();
        assert_eq!(item.title, "Real Title");
        assert_eq!(item.content, "Rust is fast. Tokio is async.");
        assert_eq!(item.status, ItemStatus::Processing);
        assert!(item.processed_date.is_some());
    }

    #[tokio::test]
    async fn test_keeps_previous_title_without_one_in_page() {
        let deps = test_support::deps();
        let item = test_support::captured(
            &deps,
            KnowledgeItem::captured("Mine", "raw", Some("<p>x</p>".into()), None, None),
        )
        .await;

        let handler = ExtractionHandler::new(deps.clone());
        let ctx = test_support::context(item.id, JobType::Extraction, json!({"html": "<p>Body text</p>"}));
        assert!(matches!(handler.execute(ctx).await, JobResult::Success(_)));

        let item = deps.store.items.get(item.id).await.unwrap().unwrap();
        assert_eq!(item.title, "Mine");
        assert_eq!(item.content, "Body text");
    }

    #[tokio::test]
    async fn test_missing_html_is_permanent() {
        let deps = test_support::deps();
        let handler = ExtractionHandler::new(deps);
        let ctx = test_support::context(uuid::Uuid::now_v7(), JobType::Extraction, json!({"url": "x"}));
        assert!(matches!(handler.execute(ctx).await, JobResult::Failed(_)));
    }
}
