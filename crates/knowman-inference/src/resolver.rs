//! Lazy, cached provider resolution with observable offline fallback.
//!
//! A [`ProviderResolver`] is built once by the application root and shared
//! by the stage handlers. The main provider (summaries, tags) and the
//! embedding provider are each resolved on first use and cached for the
//! lifetime of the resolver. When the configured backend cannot be used the
//! offline backend takes its place; the substitution is logged at WARN,
//! published on the event bus, and kept as the capability's fallback reason.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use knowman_core::{EventBus, PipelineEvent};

use crate::config::{AiConfig, ProviderKind};
use crate::gemini::GeminiBackend;
use crate::offline::OfflineProvider;
use crate::openai::OpenAIBackend;
use crate::provider::AiProvider;

/// What a resolved provider is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Summarization and tagging.
    Main,
    Embedding,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Main => "main",
            Capability::Embedding => "embedding",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Resolved {
    provider: Arc<dyn AiProvider>,
    fallback_reason: Option<String>,
}

/// Provider health report (one capability).
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    /// Provider actually serving the capability.
    pub provider: ProviderKind,
    pub health: bool,
    pub main_provider: String,
    pub embedding_provider: String,
    pub model: String,
    pub testing: Capability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

pub struct ProviderResolver {
    config: AiConfig,
    events: Option<EventBus>,
    main: OnceLock<Resolved>,
    embedding: OnceLock<Resolved>,
}

impl ProviderResolver {
    pub fn new(config: AiConfig) -> Self {
        Self {
            config,
            events: None,
            main: OnceLock::new(),
            embedding: OnceLock::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(AiConfig::from_env())
    }

    /// Resolver that always serves the offline backend.
    pub fn offline() -> Self {
        Self::new(AiConfig::default())
    }

    /// Resolver with pre-built providers for both capabilities.
    pub fn with_providers(main: Arc<dyn AiProvider>, embedding: Arc<dyn AiProvider>) -> Self {
        let resolver = Self::offline();
        let _ = resolver.main.set(Resolved {
            provider: main,
            fallback_reason: None,
        });
        let _ = resolver.embedding.set(Resolved {
            provider: embedding,
            fallback_reason: None,
        });
        resolver
    }

    /// Publish fallbacks on `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    /// Provider for summarization and tagging.
    pub fn main(&self) -> Arc<dyn AiProvider> {
        self.get(Capability::Main)
    }

    /// Provider for embeddings.
    pub fn embedding(&self) -> Arc<dyn AiProvider> {
        self.get(Capability::Embedding)
    }

    pub fn get(&self, capability: Capability) -> Arc<dyn AiProvider> {
        Arc::clone(&self.resolved(capability).provider)
    }

    /// Why the offline backend serves `capability`, if it replaced the
    /// configured one. Resolves the capability if needed.
    pub fn fallback_reason(&self, capability: Capability) -> Option<String> {
        self.resolved(capability).fallback_reason.clone()
    }

    /// Health and identity of the provider serving a capability.
    pub async fn provider_status(&self, for_embeddings: bool) -> ProviderStatus {
        let capability = if for_embeddings {
            Capability::Embedding
        } else {
            Capability::Main
        };
        let provider = self.get(capability);
        let health = match provider.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "resolver",
                    capability = %capability,
                    error = %e,
                    "Provider health check errored"
                );
                false
            }
        };

        ProviderStatus {
            provider: provider.provider_type(),
            health,
            main_provider: self.config.requested_provider(false).to_string(),
            embedding_provider: self.config.requested_provider(true).to_string(),
            model: provider.model_info(),
            testing: capability,
            fallback_reason: self.fallback_reason(capability),
        }
    }

    fn resolved(&self, capability: Capability) -> &Resolved {
        let cell = match capability {
            Capability::Main => &self.main,
            Capability::Embedding => &self.embedding,
        };
        cell.get_or_init(|| self.build(capability))
    }

    fn build(&self, capability: Capability) -> Resolved {
        let requested = self
            .config
            .requested_provider(capability == Capability::Embedding)
            .to_string();

        let kind: ProviderKind = match requested.parse() {
            Ok(kind) => kind,
            Err(e) => return self.fallback(capability, &requested, e.to_string()),
        };

        if let Err(e) = self.config.validate_for(kind) {
            return self.fallback(capability, &requested, e.to_string());
        }

        let built: knowman_core::Result<Arc<dyn AiProvider>> = match kind {
            ProviderKind::Mock => {
                info!(
                    subsystem = "inference",
                    component = "resolver",
                    capability = %capability,
                    "Using offline provider (no AI calls)"
                );
                Ok(Arc::new(OfflineProvider::new()))
            }
            ProviderKind::OpenAI => OpenAIBackend::new(self.config.openai_client_config())
                .map(|b| Arc::new(b) as Arc<dyn AiProvider>),
            ProviderKind::LlamaCpp => OpenAIBackend::new(self.config.llamacpp_client_config())
                .map(|b| Arc::new(b) as Arc<dyn AiProvider>),
            ProviderKind::Gemini => GeminiBackend::new(self.config.gemini_client_config())
                .map(|b| Arc::new(b) as Arc<dyn AiProvider>),
            ProviderKind::Anthropic => {
                return self.fallback(
                    capability,
                    &requested,
                    "anthropic provider is not implemented".to_string(),
                );
            }
        };

        match built {
            Ok(provider) => {
                debug!(
                    subsystem = "inference",
                    component = "resolver",
                    capability = %capability,
                    provider = %provider.provider_type(),
                    model = %provider.model_info(),
                    "Provider resolved"
                );
                Resolved {
                    provider,
                    fallback_reason: None,
                }
            }
            Err(e) => self.fallback(capability, &requested, e.to_string()),
        }
    }

    fn fallback(&self, capability: Capability, requested: &str, reason: String) -> Resolved {
        warn!(
            subsystem = "inference",
            component = "resolver",
            capability = %capability,
            requested = %requested,
            reason = %reason,
            "Falling back to offline provider"
        );
        if let Some(events) = &self.events {
            events.emit(PipelineEvent::ProviderFallback {
                capability: capability.to_string(),
                requested: requested.to_string(),
                reason: reason.clone(),
            });
        }
        Resolved {
            provider: Arc::new(OfflineProvider::new()),
            fallback_reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolver_from(pairs: &[(&str, &str)]) -> ProviderResolver {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProviderResolver::new(AiConfig::from_lookup(|key| map.get(key).cloned()))
    }

    #[test]
    fn test_default_is_offline_without_fallback() {
        let resolver = ProviderResolver::offline();
        assert_eq!(resolver.main().provider_type(), ProviderKind::Mock);
        assert!(resolver.fallback_reason(Capability::Main).is_none());
    }

    #[test]
    fn test_missing_key_falls_back() {
        let resolver = resolver_from(&[("AI_PROVIDER", "openai")]);
        assert_eq!(resolver.main().provider_type(), ProviderKind::Mock);
        let reason = resolver.fallback_reason(Capability::Main).unwrap();
        assert!(reason.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_unknown_provider_falls_back() {
        let resolver = resolver_from(&[("AI_PROVIDER", "watson")]);
        assert_eq!(resolver.main().provider_type(), ProviderKind::Mock);
        assert!(resolver
            .fallback_reason(Capability::Main)
            .unwrap()
            .contains("watson"));
    }

    #[test]
    fn test_anthropic_not_implemented() {
        let resolver = resolver_from(&[("AI_PROVIDER", "anthropic"), ("ANTHROPIC_API_KEY", "k")]);
        assert_eq!(resolver.main().provider_type(), ProviderKind::Mock);
        assert!(resolver
            .fallback_reason(Capability::Main)
            .unwrap()
            .contains("not implemented"));
    }

    #[test]
    fn test_openai_resolves_with_key() {
        let resolver = resolver_from(&[("AI_PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-test")]);
        let main = resolver.main();
        assert_eq!(main.provider_type(), ProviderKind::OpenAI);
        assert_eq!(main.model_info(), "gpt-4o-mini (OpenAI)");
        assert!(resolver.fallback_reason(Capability::Main).is_none());
    }

    #[test]
    fn test_embedding_provider_resolved_separately() {
        let resolver = resolver_from(&[
            ("AI_PROVIDER", "mock"),
            ("EMBEDDING_PROVIDER", "llamacpp"),
        ]);
        assert_eq!(resolver.main().provider_type(), ProviderKind::Mock);
        assert_eq!(resolver.embedding().provider_type(), ProviderKind::LlamaCpp);
    }

    #[test]
    fn test_embedding_fallback_does_not_affect_main() {
        let resolver = resolver_from(&[
            ("AI_PROVIDER", "llamacpp"),
            ("EMBEDDING_PROVIDER", "gemini"),
        ]);
        assert_eq!(resolver.main().provider_type(), ProviderKind::LlamaCpp);
        assert_eq!(resolver.embedding().provider_type(), ProviderKind::Mock);
        assert!(resolver.fallback_reason(Capability::Main).is_none());
        assert!(resolver.fallback_reason(Capability::Embedding).is_some());
    }

    #[test]
    fn test_resolution_is_cached() {
        let resolver = resolver_from(&[("AI_PROVIDER", "openai"), ("OPENAI_API_KEY", "k")]);
        let a = resolver.main();
        let b = resolver.main();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_fallback_published_once() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let resolver = resolver_from(&[("AI_PROVIDER", "gemini")]).with_events(bus);

        resolver.main();
        resolver.main();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "provider.fallback");
        match envelope.payload {
            PipelineEvent::ProviderFallback {
                capability,
                requested,
                ..
            } => {
                assert_eq!(capability, "main");
                assert_eq!(requested, "gemini");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_provider_status_offline() {
        let resolver = resolver_from(&[("AI_PROVIDER", "openai")]);
        let status = resolver.provider_status(false).await;
        assert_eq!(status.provider, ProviderKind::Mock);
        assert!(status.health);
        assert_eq!(status.main_provider, "openai");
        assert_eq!(status.embedding_provider, "openai");
        assert_eq!(status.model, "mock-ai-provider-v1.0");
        assert_eq!(status.testing, Capability::Main);
        assert!(status.fallback_reason.is_some());
    }
}
