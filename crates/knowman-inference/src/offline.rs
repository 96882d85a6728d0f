//! Deterministic offline backend.
//!
//! Produces summaries, tags and embeddings from plain text heuristics with no
//! network I/O. The resolver substitutes it whenever the configured backend
//! cannot be used, and it is the default when no provider is configured.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument};

use knowman_core::{defaults, truncate_chars, Result};

use crate::config::ProviderKind;
use crate::provider::*;

pub const SUMMARIZER_MODEL: &str = "mock-summarizer";
pub const TAGGER_MODEL: &str = "mock-tagger";
pub const EMBEDDER_MODEL: &str = "mock-embedder";
pub const MODEL_INFO: &str = "mock-ai-provider-v1.0";

const TAG_CONFIDENCE: f32 = 0.8;

const STOP_WORDS: [&str; 13] = [
    "that", "this", "with", "from", "have", "what", "when", "where", "which", "will", "your",
    "they", "their",
];

fn sentence_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+").expect("static regex"))
}

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]+").expect("static regex"))
}

/// First three non-empty sentences of `content`, capped at `max_length`
/// characters.
pub fn summarize_text(content: &str, max_length: usize) -> String {
    let sentences: Vec<&str> = sentence_boundary()
        .split(content)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(defaults::SUMMARY_SENTENCES)
        .collect();
    if sentences.is_empty() {
        return String::new();
    }

    let summary = format!("{}.", sentences.join(". "));
    if summary.chars().count() <= max_length {
        summary
    } else if max_length <= 3 {
        // No room for an ellipsis.
        truncate_chars(&summary, max_length)
    } else {
        format!("{}...", truncate_chars(&summary, max_length - 3))
    }
}

/// Most frequent words of `title + " " + content`, appended to the existing
/// tags. Ties keep first-appearance order.
pub fn extract_tags(
    title: Option<&str>,
    content: &str,
    existing: &[String],
    max_tags: usize,
) -> Vec<String> {
    let text = format!("{} {}", title.unwrap_or(""), content).to_lowercase();

    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in non_word().split(&text) {
        if word.len() <= 3 || STOP_WORDS.contains(&word) {
            continue;
        }
        let count = counts.entry(word).or_insert(0);
        if *count == 0 {
            order.push(word);
        }
        *count += 1;
    }

    // Stable sort keeps first appearance among equal counts
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));

    let top: Vec<String> = order
        .into_iter()
        .take(max_tags)
        .map(str::to_string)
        .collect();
    knowman_core::union_tags(existing, &top).0
}

/// Bag-of-words hash embedding with [`defaults::OFFLINE_EMBED_DIMENSION`]
/// buckets.
pub fn embed_text(content: &str) -> Vec<f32> {
    let dimension = defaults::OFFLINE_EMBED_DIMENSION;
    let text = truncate_chars(content, defaults::OFFLINE_EMBED_CHARS).to_lowercase();

    let mut unique: Vec<&str> = Vec::new();
    for word in non_word().split(&text) {
        if word.len() > 2 && !unique.contains(&word) {
            unique.push(word);
        }
    }

    let mut vector = vec![0.0f32; dimension];
    let denom = (unique.len() + 1) as f32;
    for (i, word) in unique.iter().enumerate() {
        let hash: usize = word.chars().map(|c| c as usize).sum();
        let bucket = (hash + i) % dimension;
        vector[bucket] = (vector[bucket] + 1.0) / denom;
    }
    vector
}

/// Offline provider (`mock`). Always healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineProvider;

impl OfflineProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AiProvider for OfflineProvider {
    #[instrument(skip(self, request), fields(subsystem = "inference", component = "offline", op = "summarize"))]
    async fn summarize(&self, request: &SummarizationRequest) -> Result<SummarizationResponse> {
        let summary = summarize_text(&request.content, request.max_length);
        debug!(summary_len = summary.len(), "Offline summary generated");
        Ok(SummarizationResponse {
            summary,
            model: SUMMARIZER_MODEL.to_string(),
            tokens_used: None,
        })
    }

    #[instrument(skip(self, request), fields(subsystem = "inference", component = "offline", op = "generate_tags"))]
    async fn generate_tags(&self, request: &TaggingRequest) -> Result<TaggingResponse> {
        let tags = extract_tags(
            request.title.as_deref(),
            &request.content,
            &request.existing_tags,
            request.max_tags,
        );
        debug!(tag_count = tags.len(), "Offline tags generated");
        Ok(TaggingResponse {
            tags,
            model: TAGGER_MODEL.to_string(),
            confidence: Some(TAG_CONFIDENCE),
        })
    }

    #[instrument(skip(self, request), fields(subsystem = "inference", component = "offline", op = "generate_embeddings"))]
    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        Ok(EmbeddingResponse {
            vector: embed_text(&request.content),
            model: EMBEDDER_MODEL.to_string(),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn model_info(&self) -> String {
        MODEL_INFO.to_string()
    }

    fn embedding_dimension(&self) -> usize {
        defaults::OFFLINE_EMBED_DIMENSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_first_three_sentences() {
        assert_eq!(
            summarize_text("Hello. World. Foo. Bar.", 500),
            "Hello. World. Foo."
        );
    }

    #[test]
    fn test_summary_mixed_punctuation() {
        assert_eq!(
            summarize_text("Really?! Yes... it works!", 500),
            "Really. Yes. it works."
        );
    }

    #[test]
    fn test_summary_empty_content() {
        assert_eq!(summarize_text("", 500), "");
        assert_eq!(summarize_text(" ... !!", 500), "");
    }

    #[test]
    fn test_summary_truncation() {
        let content = format!("{}. Second.", "a".repeat(600));
        let summary = summarize_text(&content, 500);
        assert_eq!(summary.chars().count(), 500);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_summary_tiny_limit_stays_within_bound() {
        let content = "Hello. World.";
        assert_eq!(summarize_text(content, 0), "");
        assert_eq!(summarize_text(content, 2), "He");
        assert_eq!(summarize_text(content, 3), "Hel");
        assert_eq!(summarize_text(content, 4), "H...");
    }

    #[test]
    fn test_summary_is_deterministic() {
        let text = "One fish. Two fish! Red fish? Blue fish.";
        assert_eq!(summarize_text(text, 100), summarize_text(text, 100));
    }

    #[test]
    fn test_tags_from_title_and_content() {
        let tags = extract_tags(Some("T"), "Hello. World. Foo. Bar.", &[], 5);
        assert_eq!(tags, vec!["hello", "world"]);
    }

    #[test]
    fn test_tags_rank_by_frequency_then_appearance() {
        let tags = extract_tags(
            None,
            "alpha beta gamma beta gamma gamma delta",
            &[],
            3,
        );
        assert_eq!(tags, vec!["gamma", "beta", "alpha"]);
    }

    #[test]
    fn test_tags_drop_stop_words_and_short_words() {
        let tags = extract_tags(None, "this that with their tokio is an ok", &[], 5);
        assert_eq!(tags, vec!["tokio"]);
    }

    #[test]
    fn test_tags_existing_first_and_deduplicated() {
        let existing = vec!["rust".to_string(), "tokio".to_string()];
        let tags = extract_tags(None, "tokio runtime tokio", &existing, 5);
        assert_eq!(tags, vec!["rust", "tokio", "runtime"]);
    }

    #[test]
    fn test_embedding_dimension_and_determinism() {
        let a = embed_text("The quick brown fox jumps over the lazy dog");
        let b = embed_text("The quick brown fox jumps over the lazy dog");
        assert_eq!(a.len(), 384);
        assert_eq!(a, b);
        assert!(a.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn test_embedding_bucket_value() {
        // "abc" = 97 + 98 + 99 = 294, one unique token
        let v = embed_text("abc");
        assert_eq!(v[294], 0.5);
        assert_eq!(v.iter().filter(|x| **x != 0.0).count(), 1);
    }

    #[test]
    fn test_embedding_empty_content() {
        let v = embed_text("");
        assert_eq!(v.len(), 384);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_offline_provider_contract() {
        let provider = OfflineProvider::new();
        assert!(provider.health_check().await.unwrap());
        assert_eq!(provider.provider_type(), ProviderKind::Mock);
        assert_eq!(provider.embedding_dimension(), 384);

        let summary = provider
            .summarize(&SummarizationRequest::new("Hello. World. Foo. Bar.").with_title("T"))
            .await
            .unwrap();
        assert_eq!(summary.summary, "Hello. World. Foo.");
        assert_eq!(summary.model, SUMMARIZER_MODEL);

        let tags = provider
            .generate_tags(&TaggingRequest::new("Hello. World. Foo. Bar.").with_title("T"))
            .await
            .unwrap();
        assert_eq!(tags.tags, vec!["hello", "world"]);
        assert_eq!(tags.confidence, Some(0.8));

        let embedding = provider
            .generate_embeddings(&EmbeddingRequest::new("Hello world"))
            .await
            .unwrap();
        assert_eq!(embedding.vector.len(), 384);
        assert_eq!(embedding.model, EMBEDDER_MODEL);
    }
}
