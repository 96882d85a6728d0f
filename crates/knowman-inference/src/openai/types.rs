//! Wire types for the OpenAI-compatible endpoints.
//!
//! Only the fields the backend reads are modeled; serde skips the rest.

use serde::{Deserialize, Serialize};

// =============================================================================
// EMBEDDINGS
// =============================================================================

#[derive(Debug, Serialize)]
pub struct OpenAIEmbeddingRequest {
    pub model: String,
    pub input: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl OpenAIEmbeddingResponse {
    /// Vector for the first input, by position rather than arrival order.
    pub fn into_vector(self) -> Option<Vec<f32>> {
        self.data
            .into_iter()
            .min_by_key(|d| d.index)
            .map(|d| d.embedding)
    }
}

// =============================================================================
// CHAT COMPLETIONS
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Outgoing prompt message.
#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

impl ChatCompletionResponse {
    /// Trimmed content of the first choice, or an empty string.
    pub fn first_content(&self) -> String {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    pub fn total_tokens(&self) -> Option<u32> {
        self.usage.as_ref().map(|u| u.total_tokens)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub struct OpenAIErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl OpenAIErrorResponse {
    /// `(message, type)` as reported by the server.
    pub fn into_parts(self) -> (String, String) {
        (self.error.message, self.error.kind)
    }
}
