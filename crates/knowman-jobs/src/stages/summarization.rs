use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument};

use knowman_core::{ItemPatch, JobType, Result};
use knowman_inference::{AiProvider, SummarizationRequest};

use super::{StageDeps, TextInput};
use crate::handler::{JobContext, JobHandler, JobResult};

pub struct SummarizationHandler {
    deps: StageDeps,
}

impl SummarizationHandler {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, ctx: &JobContext) -> Result<JsonValue> {
        let input: TextInput = ctx.parse_input()?;
        let provider = self.deps.providers.main();

        let mut request = SummarizationRequest::new(input.content);
        if let Some(title) = input.title {
            request = request.with_title(title);
        }
        let response = provider.summarize(&request).await?;

        let patch = ItemPatch::Summary {
            summary: response.summary.clone(),
        };
        self.deps.persist(ctx.item_id(), &patch).await?;

        info!(
            item_id = %ctx.item_id(),
            model = %response.model,
            summary_len = response.summary.len(),
            "Summarization completed"
        );

        Ok(json!({
            "summary": response.summary,
            "model": response.model,
        }))
    }
}

#[async_trait]
impl JobHandler for SummarizationHandler {
    fn job_type(&self) -> JobType {
        JobType::Summarization
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "summarization", op = "execute", job_id = %ctx.job_id()))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        self.run(&ctx).await.into()
    }
}
