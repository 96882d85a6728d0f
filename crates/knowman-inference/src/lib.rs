//! # knowman-inference
//!
//! AI provider abstraction for the knowman enrichment pipeline.
//!
//! This crate provides:
//! - The [`AiProvider`] capability trait (summarize, tag, embed, health)
//! - A deterministic offline backend
//! - An OpenAI-compatible backend (also serving llama.cpp)
//! - A Gemini REST backend
//! - Environment configuration with per-backend validation
//! - A lazy, cached [`ProviderResolver`] that falls back to the offline
//!   backend on misconfiguration
//!
//! # Example
//!
//! ```rust
//! use knowman_inference::{AiProvider, ProviderResolver, SummarizationRequest};
//!
//! let resolver = ProviderResolver::offline();
//! let provider = resolver.main();
//! assert_eq!(provider.model_info(), "mock-ai-provider-v1.0");
//! let _request = SummarizationRequest::new("First. Second. Third. Fourth.");
//! ```

pub mod config;
pub mod gemini;
pub mod offline;
pub mod openai;
pub mod provider;
pub mod resolver;

pub use config::{AiConfig, ConfigError, ProviderKind};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use offline::OfflineProvider;
pub use openai::{OpenAIBackend, OpenAIConfig};
pub use provider::{
    parse_tag_list, AiProvider, EmbeddingRequest, EmbeddingResponse, SummarizationRequest,
    SummarizationResponse, TaggingRequest, TaggingResponse,
};
pub use resolver::{Capability, ProviderResolver, ProviderStatus};
