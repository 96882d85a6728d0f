//! OpenAI-compatible inference backend implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use knowman_core::{defaults, truncate_chars, Error, Result};

use super::error::{to_knowman_error, OpenAIErrorCode};
use super::types::*;
use crate::config::{
    ProviderKind, DEFAULT_OPENAI_EMBEDDING_MODEL, DEFAULT_OPENAI_EMBED_DIM, DEFAULT_OPENAI_MODEL,
    DEFAULT_OPENAI_URL,
};
use crate::provider::*;

/// Delay before the first client-side resend; doubles on each further one.
const RETRY_BASE_DELAY_MS: u64 = 250;

/// Configuration for OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Reported provider identity (`openai` or `llamacpp`).
    pub provider: ProviderKind,
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model to use for generation.
    pub gen_model: String,
    /// Model to use for embeddings.
    pub embed_model: String,
    /// Expected embedding dimension.
    pub embed_dimension: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Client-side resends for rate limits, server errors and connect failures.
    pub max_retries: u32,
    /// Log a preview of every result at INFO.
    pub enable_logging: bool,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAI,
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            gen_model: DEFAULT_OPENAI_MODEL.to_string(),
            embed_model: DEFAULT_OPENAI_EMBEDDING_MODEL.to_string(),
            embed_dimension: DEFAULT_OPENAI_EMBED_DIM,
            temperature: Some(0.7),
            max_tokens: Some(1000),
            timeout_ms: defaults::AI_REQUEST_TIMEOUT_MS,
            max_retries: defaults::AI_MAX_RETRIES,
            enable_logging: true,
        }
    }
}

/// OpenAI-compatible inference backend.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Create a new OpenAI backend with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            provider = %config.provider,
            base_url = %config.base_url,
            gen_model = %config.gen_model,
            embed_model = %config.embed_model,
            "Initializing OpenAI-compatible backend"
        );

        Ok(Self { client, config })
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn label(&self) -> &'static str {
        match self.config.provider {
            ProviderKind::LlamaCpp => "llama.cpp",
            _ => "OpenAI",
        }
    }

    /// Build a request with authentication if configured.
    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.header("Content-Type", "application/json")
    }

    /// POST a JSON body, resending on retryable failures up to
    /// `max_retries` times.
    async fn post_json<B, R>(&self, endpoint: &str, body: &B, embedding: bool) -> Result<R>
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
            match self.build_request(endpoint).json(body).send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<R>()
                        .await
                        .map_err(|e| wrap(format!("Failed to parse response: {}", e)));
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let (message, error_type) = match response.json::<OpenAIErrorResponse>().await
                    {
                        Ok(body) => body.into_parts(),
                        Err(_) => ("Unknown error".to_string(), String::new()),
                    };
                    let code = OpenAIErrorCode::from_response(status, &error_type);
                    if code.is_retryable() && resends < self.config.max_retries {
                        resends += 1;
                        warn!(
                            subsystem = "inference",
                            component = "openai",
                            endpoint,
                            status,
                            attempt = resends,
                            "Retryable backend error, resending"
                        );
                        tokio::time::sleep(retry_delay).await;
                        continue;
                    }
                    return Err(to_knowman_error(
                        code,
                        &format!("{} returned {}: {}", self.label(), status, message),
                        embedding,
                    ));
                }
                Err(e) if e.is_connect() && resends < self.config.max_retries => {
                    resends += 1;
                    warn!(
                        subsystem = "inference",
                        component = "openai",
                        endpoint,
                        attempt = resends,
                        error = %e,
                        "Connection failed, resending"
                    );
                    tokio::time::sleep(retry_delay).await;
                }
                Err(e) if e.is_timeout() => {
                    return Err(Error::Timeout(format!(
                        "{} request to {} timed out: {}",
                        self.label(),
                        endpoint,
                        e
                    )));
                }
                Err(e) => return Err(wrap(format!("Request failed: {}", e))),
            }
        }
    }

    async fn chat(
        &self,
        system: &str,
        prompt: String,
        max_tokens: Option<u32>,
    ) -> Result<ChatCompletionResponse> {
        debug!(
            model = %self.config.gen_model,
            prompt_len = prompt.len(),
            "Sending chat completion"
        );
        let request = ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(prompt)],
            temperature: self.config.temperature,
            max_tokens,
        };
        self.post_json("/chat/completions", &request, false).await
    }
}

#[async_trait]
impl AiProvider for OpenAIBackend {
    #[instrument(skip(self, request), fields(subsystem = "inference", component = "openai", op = "summarize", model = %self.config.gen_model))]
    async fn summarize(&self, request: &SummarizationRequest) -> Result<SummarizationResponse> {
        let response = self
            .chat(
                SUMMARIZATION_SYSTEM_PROMPT,
                summarization_prompt(request),
                self.config.max_tokens,
            )
            .await?;
        let summary = response.first_content();

        if self.config.enable_logging {
            info!(
                preview = %truncate_chars(&summary, 100),
                "{} summarization completed",
                self.label()
            );
        }

        Ok(SummarizationResponse {
            summary,
            model: self.config.gen_model.clone(),
            tokens_used: response.total_tokens(),
        })
    }

    #[instrument(skip(self, request), fields(subsystem = "inference", component = "openai", op = "generate_tags", model = %self.config.gen_model))]
    async fn generate_tags(&self, request: &TaggingRequest) -> Result<TaggingResponse> {
        let response = self
            .chat(
                TAGGING_SYSTEM_PROMPT,
                tagging_prompt(request),
                Some(defaults::TAGGING_MAX_TOKENS),
            )
            .await?;
        let tags = parse_tag_list(&response.first_content(), request.max_tags);

        if self.config.enable_logging {
            info!(tags = %tags.join(", "), "{} tagging completed", self.label());
        }

        Ok(TaggingResponse {
            tags,
            model: self.config.gen_model.clone(),
            confidence: Some(MODEL_TAG_CONFIDENCE),
        })
    }

    #[instrument(skip(self, request), fields(subsystem = "inference", component = "openai", op = "generate_embeddings", model = %self.config.embed_model))]
    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        let body = OpenAIEmbeddingRequest {
            model: self.config.embed_model.clone(),
            input: truncate_chars(&request.text(), defaults::BACKEND_CONTENT_CHARS),
        };
        let response: OpenAIEmbeddingResponse =
            self.post_json("/embeddings", &body, true).await?;

        let vector = response
            .into_vector()
            .ok_or_else(|| Error::Embedding("Response contained no embedding".to_string()))?;

        if self.config.enable_logging {
            info!(
                dimension = vector.len(),
                "{} embeddings generated",
                self.label()
            );
        }

        Ok(EmbeddingResponse {
            vector,
            model: self.config.embed_model.clone(),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let request = ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages: vec![ChatMessage::user("Hello")],
            temperature: None,
            max_tokens: Some(5),
        };
        let response = self
            .build_request("/chat/completions")
            .timeout(Duration::from_secs(defaults::HEALTH_CHECK_TIMEOUT_SECS))
            .json(&request)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("{} health check passed", self.label());
                Ok(true)
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "{} health check failed", self.label());
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "{} health check error", self.label());
                Ok(false)
            }
        }
    }

    fn provider_type(&self) -> ProviderKind {
        self.config.provider
    }

    fn model_info(&self) -> String {
        format!("{} ({})", self.config.gen_model, self.label())
    }

    fn embedding_dimension(&self) -> usize {
        self.config.embed_dimension
    }
}
