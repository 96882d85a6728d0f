//! Stage handlers: extraction, summarization, tagging, embedding.
//!
//! Each handler parses its self-contained job input, calls the provider
//! resolved for its capability, and persists only the item fields its stage
//! owns through one [`ItemPatch`].

mod embedding;
mod extraction;
mod summarization;
mod tagging;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use knowman_core::{EventBus, ItemPatch, KnowledgeItem, PipelineEvent, Result};
use knowman_inference::ProviderResolver;

use crate::handler::JobHandler;
use crate::store::Store;

pub use embedding::EmbeddingHandler;
pub use extraction::ExtractionHandler;
pub use summarization::SummarizationHandler;
pub use tagging::TaggingHandler;

/// Collaborators shared by every stage handler.
#[derive(Clone)]
pub struct StageDeps {
    pub store: Store,
    pub providers: Arc<ProviderResolver>,
    pub events: EventBus,
}

impl StageDeps {
    pub fn new(store: Store, providers: Arc<ProviderResolver>, events: EventBus) -> Self {
        Self {
            store,
            providers,
            events,
        }
    }

    /// Apply a stage patch and announce the update.
    pub(crate) async fn persist(
        &self,
        item_id: Uuid,
        patch: &ItemPatch,
    ) -> Result<(KnowledgeItem, Vec<String>)> {
        let (item, added) = self.store.items.apply_patch(item_id, patch).await?;
        debug!(
            subsystem = "jobs",
            component = "stages",
            item_id = %item_id,
            stage = %patch.stage(),
            merge = ?patch.merge_strategy(),
            status = %item.status,
            "Item updated"
        );
        self.events.emit(PipelineEvent::ItemUpdated {
            item_id,
            stage: patch.stage(),
        });
        Ok((item, added))
    }
}

/// One handler per stage.
pub fn stage_handlers(deps: &StageDeps) -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(ExtractionHandler::new(deps.clone())),
        Arc::new(SummarizationHandler::new(deps.clone())),
        Arc::new(TaggingHandler::new(deps.clone())),
        Arc::new(EmbeddingHandler::new(deps.clone())),
    ]
}

/// Input of the extraction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionInput {
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Input of the text stages (summarization, tagging, embedding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInput {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tags already on the item; only carried by tagging jobs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub existing_tags: Vec<String>,
}
