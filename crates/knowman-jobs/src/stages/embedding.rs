use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument};

use knowman_core::{Error, ItemPatch, JobType, Result};
use knowman_inference::{AiProvider, EmbeddingRequest};

use super::{StageDeps, TextInput};
use crate::handler::{JobContext, JobHandler, JobResult};

/// Computes the item's embedding with the embedding provider.
pub struct EmbeddingHandler {
    deps: StageDeps,
}

impl EmbeddingHandler {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, ctx: &JobContext) -> Result<JsonValue> {
        let input: TextInput = ctx.parse_input()?;
        let provider = self.deps.providers.embedding();

        let mut request = EmbeddingRequest::new(input.content);
        if let Some(title) = input.title {
            request = request.with_title(title);
        }
        let response = provider.generate_embeddings(&request).await?;

        let expected = provider.embedding_dimension();
        if response.vector.len() != expected {
            return Err(Error::InvalidInput(format!(
                "Embedding dimension mismatch from {}: expected {}, got {}",
                response.model,
                expected,
                response.vector.len()
            )));
        }

        let dimension = response.vector.len();
        let patch = ItemPatch::Embedding {
            vector: response.vector,
        };
        self.deps.persist(ctx.item_id(), &patch).await?;

        info!(
            item_id = %ctx.item_id(),
            model = %response.model,
            dimension,
            "Embedding completed"
        );

        Ok(json!({
            "embeddingSize": dimension,
            "model": response.model,
        }))
    }
}

#[async_trait]
impl JobHandler for EmbeddingHandler {
    fn job_type(&self) -> JobType {
        JobType::Embedding
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "embedding", op = "execute", job_id = %ctx.job_id()))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        self.run(&ctx).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use knowman_core::{EventBus, ItemStatus, KnowledgeItem};
    use knowman_inference::{
        EmbeddingResponse, OfflineProvider, ProviderKind, ProviderResolver, SummarizationRequest,
        SummarizationResponse, TaggingRequest, TaggingResponse,
    };

    use crate::stages::test_support;
    use crate::store::Store;

    /// Declares a dimension it never produces.
    struct WrongDimension;

    #[async_trait]
    impl AiProvider for WrongDimension {
        async fn summarize(&self, r: &SummarizationRequest) -> Result<SummarizationResponse> {
            OfflineProvider::new().summarize(r).await
        }
        async fn generate_tags(&self, r: &TaggingRequest) -> Result<TaggingResponse> {
            OfflineProvider::new().generate_tags(r).await
        }
        async fn generate_embeddings(&self, _r: &EmbeddingRequest) -> Result<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                vector: vec![0.0; 3],
                model: "short".to_string(),
            })
        }
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
        fn provider_type(&self) -> ProviderKind {
            ProviderKind::Mock
        }
        fn model_info(&self) -> String {
            "short".to_string()
        }
        fn embedding_dimension(&self) -> usize {
            8
        }
    }

    #[tokio::test]
    async fn test_offline_embedding_stored() {
        let deps = test_support::deps();
        let item = test_support::captured(
            &deps,
            KnowledgeItem::captured("T", "Hello world", None, None, None),
        )
        .await;

        let handler = EmbeddingHandler::new(deps.clone());
        let ctx = test_support::context(
            item.id,
            JobType::Embedding,
            json!({"content": "Hello world", "title": "T"}),
        );
        assert_eq!(
            handler.execute(ctx).await,
            JobResult::Success(json!({"embeddingSize": 384, "model": "mock-embedder"}))
        );

        let item = deps.store.items.get(item.id).await.unwrap().unwrap();
        assert_eq!(item.embedding.map(|v| v.len()), Some(384));
        assert_eq!(item.status, ItemStatus::Processing);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_permanent() {
        let provider: Arc<dyn AiProvider> = Arc::new(WrongDimension);
        let deps = StageDeps::new(
            Store::in_memory(),
            Arc::new(ProviderResolver::with_providers(provider.clone(), provider)),
            EventBus::default(),
        );
        let item = test_support::captured(
            &deps,
            KnowledgeItem::captured("T", "text", None, None, None),
        )
        .await;

        let handler = EmbeddingHandler::new(deps.clone());
        let ctx = test_support::context(item.id, JobType::Embedding, json!({"content": "text"}));
        match handler.execute(ctx).await {
            JobResult::Failed(msg) => assert!(msg.contains("expected 8, got 3")),
            other => panic!("unexpected result {:?}", other),
        }

        let item = deps.store.items.get(item.id).await.unwrap().unwrap();
        assert!(item.embedding.is_none());
    }
}
