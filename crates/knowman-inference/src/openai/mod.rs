//! OpenAI-compatible inference backend.
//!
//! Works with any endpoint speaking the OpenAI chat completions and
//! embeddings API, including:
//!
//! - OpenAI cloud API
//! - llama.cpp server (`/v1` compatibility routes)
//! - vLLM
//! - LocalAI
//!
//! # Example
//!
//! ```rust,no_run
//! use knowman_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use knowman_inference::{AiProvider, SummarizationRequest};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OpenAIConfig {
//!         base_url: "http://localhost:8080/v1".to_string(),
//!         api_key: None,
//!         ..Default::default()
//!     };
//!     let backend = OpenAIBackend::new(config).unwrap();
//!     let summary = backend
//!         .summarize(&SummarizationRequest::new("Long article text..."))
//!         .await
//!         .unwrap();
//!     println!("{}", summary.summary);
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig};
pub use error::{to_knowman_error, OpenAIErrorCode};
pub use types::*;
