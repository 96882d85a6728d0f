//! Gemini backend over the Generative Language REST API.
//!
//! Uses `models/{model}:generateContent` for summaries and tags and
//! `models/{model}:embedContent` for embeddings. The API key travels in the
//! `x-goog-api-key` header. Gemini does not report token usage.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use knowman_core::{defaults, truncate_chars, Error, Result};

use crate::config::{
    ProviderKind, DEFAULT_GEMINI_EMBEDDING_MODEL, DEFAULT_GEMINI_EMBED_DIM, DEFAULT_GEMINI_MODEL,
    DEFAULT_GEMINI_URL,
};
use crate::provider::*;

const RETRY_BASE_DELAY_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub embed_model: String,
    pub embed_dimension: usize,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub enable_logging: bool,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEMINI_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            embed_model: DEFAULT_GEMINI_EMBEDDING_MODEL.to_string(),
            embed_dimension: DEFAULT_GEMINI_EMBED_DIM,
            temperature: Some(0.7),
            max_output_tokens: Some(1000),
            timeout_ms: defaults::AI_REQUEST_TIMEOUT_MS,
            max_retries: defaults::AI_MAX_RETRIES,
            enable_logging: true,
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

impl GenerateContentResponse {
    /// Concatenated, trimmed text of the first candidate.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect::<String>())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct EmbedContentRequest {
    pub model: String,
    pub content: Content,
}

#[derive(Debug, Deserialize)]
pub struct EmbedContentResponse {
    pub embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingValues {
    #[serde(default)]
    pub values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
pub struct GeminiErrorResponse {
    pub error: GeminiError,
}

#[derive(Debug, Deserialize)]
pub struct GeminiError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

// =============================================================================
// Backend
// =============================================================================

pub struct GeminiBackend {
    client: Client,
    config: GeminiConfig,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config(
                "GEMINI_API_KEY is required for Gemini provider".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "gemini",
            model = %config.model,
            embed_model = %config.embed_model,
            "Initializing Gemini backend"
        );
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    async fn post_json<B, R>(&self, url: &str, body: &B, embedding: bool) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let wrap = |msg: String| {
            if embedding {
                Error::Embedding(msg)
            } else {
                Error::Inference(msg)
            }
        };

        let mut resends = 0u32;
        loop {
            let retry_delay = Duration::from_millis(RETRY_BASE_DELAY_MS << resends.min(6));
            let sent = self
                .client
                .post(url)
                .header("x-goog-api-key", &self.config.api_key)
                .json(body)
                .send()
                .await;
            match sent {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<R>()
                        .await
                        .map_err(|e| wrap(format!("Failed to parse response: {}", e)));
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let message = response
                        .json::<GeminiErrorResponse>()
                        .await
                        .map(|b| format!("{} {}", b.error.status, b.error.message))
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    let retryable = status == 429 || (500..=599).contains(&status);
                    if retryable && resends < self.config.max_retries {
                        resends += 1;
                        warn!(
                            subsystem = "inference",
                            component = "gemini",
                            status,
                            attempt = resends,
                            "Retryable backend error, resending"
                        );
                        tokio::time::sleep(retry_delay).await;
                        continue;
                    }
                    let message = format!("Gemini returned {}: {}", status, message.trim());
                    return Err(match status {
                        401 | 403 => Error::Config(format!("Authentication failed: {}", message)),
                        404 => Error::Config(format!("Model not found: {}", message)),
                        _ => wrap(message),
                    });
                }
                Err(e) if e.is_connect() && resends < self.config.max_retries => {
                    resends += 1;
                    warn!(
                        subsystem = "inference",
                        component = "gemini",
                        attempt = resends,
                        error = %e,
                        "Connection failed, resending"
                    );
                    tokio::time::sleep(retry_delay).await;
                }
                Err(e) if e.is_timeout() => {
                    return Err(Error::Timeout(format!("Gemini request timed out: {}", e)));
                }
                Err(e) => return Err(wrap(format!("Request failed: {}", e))),
            }
        }
    }

    async fn generate(&self, prompt: String, max_output_tokens: Option<u32>) -> Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content::text(prompt)],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens,
            },
        };
        let url = self.url(&self.config.model, "generateContent");
        let response: GenerateContentResponse = self.post_json(&url, &request, false).await?;
        Ok(response.text())
    }
}

#[async_trait]
impl AiProvider for GeminiBackend {
    #[instrument(skip(self, request), fields(subsystem = "inference", component = "gemini", op = "summarize", model = %self.config.model))]
    async fn summarize(&self, request: &SummarizationRequest) -> Result<SummarizationResponse> {
        let summary = self
            .generate(summarization_prompt(request), self.config.max_output_tokens)
            .await?;
        if self.config.enable_logging {
            info!(preview = %truncate_chars(&summary, 100), "Gemini summarization completed");
        }
        Ok(SummarizationResponse {
            summary,
            model: self.config.model.clone(),
            tokens_used: None,
        })
    }

    #[instrument(skip(self, request), fields(subsystem = "inference", component = "gemini", op = "generate_tags", model = %self.config.model))]
    async fn generate_tags(&self, request: &TaggingRequest) -> Result<TaggingResponse> {
        let reply = self
            .generate(tagging_prompt(request), Some(defaults::TAGGING_MAX_TOKENS))
            .await?;
        let tags = parse_tag_list(&reply, request.max_tags);
        if self.config.enable_logging {
            info!(tags = %tags.join(", "), "Gemini tagging completed");
        }
        Ok(TaggingResponse {
            tags,
            model: self.config.model.clone(),
            confidence: Some(MODEL_TAG_CONFIDENCE),
        })
    }

    #[instrument(skip(self, request), fields(subsystem = "inference", component = "gemini", op = "generate_embeddings", model = %self.config.embed_model))]
    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        let body = EmbedContentRequest {
            model: format!("models/{}", self.config.embed_model),
            content: Content::text(truncate_chars(
                &request.text(),
                defaults::BACKEND_CONTENT_CHARS,
            )),
        };
        let url = self.url(&self.config.embed_model, "embedContent");
        let response: EmbedContentResponse = self.post_json(&url, &body, true).await?;
        if response.embedding.values.is_empty() {
            return Err(Error::Embedding(
                "Response contained no embedding".to_string(),
            ));
        }
        if self.config.enable_logging {
            info!(
                dimension = response.embedding.values.len(),
                "Gemini embeddings generated"
            );
        }
        Ok(EmbeddingResponse {
            vector: response.embedding.values,
            model: self.config.embed_model.clone(),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let request = GenerateContentRequest {
            contents: vec![Content::text("Hello")],
            generation_config: GenerationConfig {
                temperature: None,
                max_output_tokens: Some(5),
            },
        };
        let response = self
            .client
            .post(self.url(&self.config.model, "generateContent"))
            .header("x-goog-api-key", &self.config.api_key)
            .timeout(Duration::from_secs(defaults::HEALTH_CHECK_TIMEOUT_SECS))
            .json(&request)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!(status = %resp.status(), "Gemini health check failed");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "Gemini health check error");
                Ok(false)
            }
        }
    }

    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model_info(&self) -> String {
        format!("{} (Gemini)", self.config.model)
    }

    fn embedding_dimension(&self) -> usize {
        self.config.embed_dimension
    }
}
