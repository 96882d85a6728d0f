//! Provider capability interface shared by every AI backend.
//!
//! Stage handlers only see [`AiProvider`]; which backend sits behind it is
//! decided by the [`ProviderResolver`](crate::resolver::ProviderResolver).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use knowman_core::{defaults, Result};

use crate::config::ProviderKind;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizationRequest {
    pub content: String,
    pub title: Option<String>,
    /// Maximum summary length in characters.
    pub max_length: usize,
}

impl SummarizationRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            title: None,
            max_length: defaults::SUMMARY_MAX_LENGTH,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggingRequest {
    pub content: String,
    pub title: Option<String>,
    /// Tags already on the item; backends keep them ahead of new ones.
    pub existing_tags: Vec<String>,
    pub max_tags: usize,
}

impl TaggingRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            title: None,
            existing_tags: Vec::new(),
            max_tags: defaults::MAX_TAGS,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_existing_tags(mut self, tags: Vec<String>) -> Self {
        self.existing_tags = tags;
        self
    }

    pub fn with_max_tags(mut self, max_tags: usize) -> Self {
        self.max_tags = max_tags;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub content: String,
    pub title: Option<String>,
}

impl EmbeddingRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// `title\n\ncontent` when a title is present, otherwise the content.
    pub fn text(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.is_empty() => format!("{}\n\n{}", title, self.content),
            _ => self.content.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizationResponse {
    pub summary: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggingResponse {
    pub tags: Vec<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub vector: Vec<f32>,
    pub model: String,
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Uniform enrichment capabilities, whatever the backend.
///
/// Backend failures (network, authentication, HTTP status) are returned as
/// errors and never replaced with offline output.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn summarize(&self, request: &SummarizationRequest) -> Result<SummarizationResponse>;

    async fn generate_tags(&self, request: &TaggingRequest) -> Result<TaggingResponse>;

    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Check if the backend is reachable and usable.
    async fn health_check(&self) -> Result<bool>;

    fn provider_type(&self) -> ProviderKind;

    /// Human-readable model description, e.g. `"gpt-4o-mini (OpenAI)"`.
    fn model_info(&self) -> String;

    /// Length of every vector returned by [`AiProvider::generate_embeddings`].
    fn embedding_dimension(&self) -> usize;
}

/// Parse a comma-separated tag reply: trimmed, lowercased, empties dropped,
/// capped at `max_tags`.
pub fn parse_tag_list(reply: &str, max_tags: usize) -> Vec<String> {
    reply
        .trim()
        .split(',')
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .take(max_tags)
        .collect()
}

/// Shared summarization prompt for chat-style backends.
pub(crate) fn summarization_prompt(request: &SummarizationRequest) -> String {
    format!(
        "Please summarize the following content in a concise way. Focus on the main points and key insights.\n\n\
         Title: {}\n\n\
         Content:\n{}\n\n\
         Provide a summary that captures the essence of the content in {} characters or less.",
        request.title.as_deref().unwrap_or("Untitled"),
        knowman_core::truncate_chars(&request.content, defaults::BACKEND_CONTENT_CHARS),
        request.max_length
    )
}

/// Shared tagging prompt for chat-style backends.
pub(crate) fn tagging_prompt(request: &TaggingRequest) -> String {
    let existing = if request.existing_tags.is_empty() {
        "None".to_string()
    } else {
        request.existing_tags.join(", ")
    };
    format!(
        "Analyze the following content and generate relevant tags. Consider the main topics, themes, and key concepts.\n\n\
         Title: {}\n\n\
         Content:\n{}\n\n\
         Existing tags (if any): {}\n\n\
         Generate {} relevant tags. Return only a comma-separated list of tags, no explanations.",
        request.title.as_deref().unwrap_or("Untitled"),
        knowman_core::truncate_chars(&request.content, defaults::BACKEND_TAGGING_CHARS),
        existing,
        request.max_tags
    )
}

pub(crate) const SUMMARIZATION_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that creates concise, accurate summaries of text content.";

pub(crate) const TAGGING_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that analyzes text content and generates relevant, concise tags.";

/// Confidence reported for tags produced by a model backend.
pub(crate) const MODEL_TAG_CONFIDENCE: f32 = 0.9;
