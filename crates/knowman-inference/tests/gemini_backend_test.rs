//! HTTP-level tests for the Gemini backend against a mock server.

use knowman_core::Error;
use knowman_inference::{
    AiProvider, EmbeddingRequest, GeminiBackend, GeminiConfig, SummarizationRequest,
    TaggingRequest,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn text_reply(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]
    })
}

fn backend_for(server: &MockServer) -> GeminiBackend {
    GeminiBackend::new(GeminiConfig {
        base_url: server.uri(),
        api_key: "g-key".to_string(),
        model: "gemini-test".to_string(),
        embed_model: "embed-test".to_string(),
        embed_dimension: 3,
        max_retries: 0,
        enable_logging: false,
        ..Default::default()
    })
    .expect("Failed to create backend")
}

#[tokio::test]
async fn test_summarize_uses_generate_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "g-key"))
        .and(body_partial_json(serde_json::json!({
            "generationConfig": {"maxOutputTokens": 1000}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("Gemini summary.\n")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let response = backend
        .summarize(&SummarizationRequest::new("content"))
        .await
        .unwrap();

    assert_eq!(response.summary, "Gemini summary.");
    assert_eq!(response.model, "gemini-test");
    assert!(response.tokens_used.is_none());
}

#[tokio::test]
async fn test_tags_limited_to_max() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .and(body_partial_json(serde_json::json!({
            "generationConfig": {"maxOutputTokens": 200}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("One, Two, Three")))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let response = backend
        .generate_tags(&TaggingRequest::new("content").with_max_tags(2))
        .await
        .unwrap();
    assert_eq!(response.tags, vec!["one", "two"]);
}

#[tokio::test]
async fn test_embed_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/embed-test:embedContent"))
        .and(body_partial_json(serde_json::json!({
            "model": "models/embed-test",
            "content": {"parts": [{"text": "T\n\nbody"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embedding": {"values": [0.5, 0.25, 0.125]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let response = backend
        .generate_embeddings(&EmbeddingRequest::new("body").with_title("T"))
        .await
        .unwrap();
    assert_eq!(response.vector, vec![0.5, 0.25, 0.125]);
    assert_eq!(backend.embedding_dimension(), 3);
}

#[tokio::test]
async fn test_forbidden_is_config_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
        })))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let err = backend
        .summarize(&SummarizationRequest::new("content"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    assert!(err.to_string().contains("API key not valid"));
}

#[tokio::test]
async fn test_rate_limit_is_transient_inference_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let err = backend
        .generate_tags(&TaggingRequest::new("content"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Inference(_)), "got {:?}", err);
    assert!(!backend.health_check().await.unwrap());
}
