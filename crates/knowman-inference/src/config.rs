//! AI provider configuration.
//!
//! Configuration is read from environment variables (or any key lookup, for
//! tests). Reading never fails: unparseable values are recorded and surface
//! from [`AiConfig::validate_for`], which the resolver treats as a reason to
//! fall back to the offline backend.
//!
//! # Example
//!
//! ```rust
//! use knowman_inference::config::{AiConfig, ProviderKind};
//!
//! let config = AiConfig::from_lookup(|key| match key {
//!     "AI_PROVIDER" => Some("openai".to_string()),
//!     _ => None,
//! });
//! // OPENAI_API_KEY is missing
//! assert!(config.validate_for(ProviderKind::OpenAI).is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use knowman_core::defaults;

use crate::gemini::GeminiConfig;
use crate::openai::OpenAIConfig;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// AI backend identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Gemini,
    LlamaCpp,
    #[default]
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::LlamaCpp => "llamacpp",
            Self::Mock => "mock",
        }
    }

    /// Prefix shared by this backend's environment variables.
    fn env_prefix(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_"),
            Self::Anthropic => Some("ANTHROPIC_"),
            Self::Gemini => Some("GEMINI_"),
            Self::LlamaCpp => Some("LLAMACPP_"),
            Self::Mock => None,
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "llamacpp" => Ok(Self::LlamaCpp),
            "mock" => Ok(Self::Mock),
            _ => Err(ConfigError::InvalidProvider(s.to_string())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Per-backend settings
// =============================================================================

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_OPENAI_EMBED_DIM: usize = 1536;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_EMBEDDING_MODEL: &str = "text-embedding-004";
pub const DEFAULT_GEMINI_EMBED_DIM: usize = 768;

pub const DEFAULT_LLAMACPP_URL: &str = "http://localhost:8080";
pub const DEFAULT_LLAMACPP_MODEL: &str = "llama2";
pub const DEFAULT_LLAMACPP_EMBED_DIM: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiSettings {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub embedding_model: String,
    pub embed_dimension: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeminiSettings {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub embedding_model: String,
    pub embed_dimension: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlamaCppSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Falls back to `model` when unset.
    pub embedding_model: Option<String>,
    pub embed_dimension: usize,
}

// =============================================================================
// AiConfig
// =============================================================================

/// Full AI configuration surface.
#[derive(Debug, Clone, Serialize)]
pub struct AiConfig {
    /// Raw `AI_PROVIDER` value (default `mock`).
    pub ai_provider: String,
    /// Raw `EMBEDDING_PROVIDER` value; embeddings follow the main provider
    /// when unset.
    pub embedding_provider: Option<String>,
    pub openai: OpenAiSettings,
    #[serde(skip_serializing)]
    pub anthropic_api_key: Option<String>,
    pub gemini: GeminiSettings,
    pub llamacpp: LlamaCppSettings,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub enable_logging: bool,
    /// Values that could not be parsed, as (variable, message).
    #[serde(skip)]
    issues: Vec<(String, String)>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl AiConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut reader = EnvReader {
            lookup: &lookup,
            issues: Vec::new(),
        };

        let config = Self {
            ai_provider: reader.string("AI_PROVIDER", ProviderKind::Mock.as_str()),
            embedding_provider: reader.optional("EMBEDDING_PROVIDER"),
            openai: OpenAiSettings {
                api_key: reader.optional("OPENAI_API_KEY"),
                base_url: reader.string("OPENAI_BASE_URL", DEFAULT_OPENAI_URL),
                model: reader.string("OPENAI_MODEL", DEFAULT_OPENAI_MODEL),
                temperature: reader.parsed("OPENAI_TEMPERATURE", 0.7),
                max_tokens: reader.parsed("OPENAI_MAX_TOKENS", 1000),
                embedding_model: reader
                    .string("OPENAI_EMBEDDING_MODEL", DEFAULT_OPENAI_EMBEDDING_MODEL),
                embed_dimension: reader.parsed("OPENAI_EMBED_DIM", DEFAULT_OPENAI_EMBED_DIM),
            },
            anthropic_api_key: reader.optional("ANTHROPIC_API_KEY"),
            gemini: GeminiSettings {
                api_key: reader.optional("GEMINI_API_KEY"),
                base_url: reader.string("GEMINI_BASE_URL", DEFAULT_GEMINI_URL),
                model: reader.string("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
                temperature: reader.parsed("GEMINI_TEMPERATURE", 0.7),
                max_output_tokens: reader.parsed("GEMINI_MAX_OUTPUT_TOKENS", 1000),
                embedding_model: reader
                    .string("GEMINI_EMBEDDING_MODEL", DEFAULT_GEMINI_EMBEDDING_MODEL),
                embed_dimension: reader.parsed("GEMINI_EMBED_DIM", DEFAULT_GEMINI_EMBED_DIM),
            },
            llamacpp: LlamaCppSettings {
                base_url: reader.string("LLAMACPP_BASE_URL", DEFAULT_LLAMACPP_URL),
                model: reader.string("LLAMACPP_MODEL", DEFAULT_LLAMACPP_MODEL),
                temperature: reader.parsed("LLAMACPP_TEMPERATURE", 0.8),
                max_tokens: reader.parsed("LLAMACPP_MAX_TOKENS", 1000),
                embedding_model: reader.optional("LLAMACPP_EMBEDDING_MODEL"),
                embed_dimension: reader.parsed("LLAMACPP_EMBED_DIM", DEFAULT_LLAMACPP_EMBED_DIM),
            },
            request_timeout_ms: reader.parsed("AI_REQUEST_TIMEOUT", defaults::AI_REQUEST_TIMEOUT_MS),
            max_retries: reader.parsed("AI_MAX_RETRIES", defaults::AI_MAX_RETRIES),
            enable_logging: reader.boolean("AI_ENABLE_LOGGING", true),
            issues: Vec::new(),
        };

        Self {
            issues: reader.issues,
            ..config
        }
    }

    /// Raw provider identifier configured for a capability.
    pub fn requested_provider(&self, for_embeddings: bool) -> &str {
        match (for_embeddings, self.embedding_provider.as_deref()) {
            (true, Some(embedding)) => embedding,
            _ => &self.ai_provider,
        }
    }

    /// Check everything `kind` needs: its credentials, its value ranges,
    /// the common settings, and that all of them parsed.
    pub fn validate_for(&self, kind: ProviderKind) -> ConfigResult<()> {
        let mut errors: Vec<String> = self
            .issues
            .iter()
            .filter(|(var, _)| {
                var.starts_with("AI_") || kind.env_prefix().is_some_and(|p| var.starts_with(p))
            })
            .map(|(_, msg)| msg.clone())
            .collect();

        check_range(&mut errors, "AI_REQUEST_TIMEOUT", self.request_timeout_ms, 1000, 60_000);
        check_range(&mut errors, "AI_MAX_RETRIES", self.max_retries, 0, 5);

        match kind {
            ProviderKind::OpenAI => {
                if self.openai.api_key.as_deref().map_or(true, str::is_empty) {
                    errors.push("OPENAI_API_KEY is required when AI_PROVIDER=openai".into());
                }
                check_url(&mut errors, "OPENAI_BASE_URL", &self.openai.base_url);
                check_range(&mut errors, "OPENAI_TEMPERATURE", self.openai.temperature, 0.0, 2.0);
                check_range(&mut errors, "OPENAI_MAX_TOKENS", self.openai.max_tokens, 1, 4000);
            }
            ProviderKind::Anthropic => {
                if self.anthropic_api_key.as_deref().map_or(true, str::is_empty) {
                    errors.push("ANTHROPIC_API_KEY is required when AI_PROVIDER=anthropic".into());
                }
            }
            ProviderKind::Gemini => {
                if self.gemini.api_key.as_deref().map_or(true, str::is_empty) {
                    errors.push("GEMINI_API_KEY is required when AI_PROVIDER=gemini".into());
                }
                check_url(&mut errors, "GEMINI_BASE_URL", &self.gemini.base_url);
                check_range(&mut errors, "GEMINI_TEMPERATURE", self.gemini.temperature, 0.0, 1.0);
                check_range(
                    &mut errors,
                    "GEMINI_MAX_OUTPUT_TOKENS",
                    self.gemini.max_output_tokens,
                    1,
                    8192,
                );
            }
            ProviderKind::LlamaCpp => {
                if self.llamacpp.base_url.is_empty() {
                    errors.push("LLAMACPP_BASE_URL is required when AI_PROVIDER=llamacpp".into());
                } else {
                    check_url(&mut errors, "LLAMACPP_BASE_URL", &self.llamacpp.base_url);
                }
                check_range(&mut errors, "LLAMACPP_TEMPERATURE", self.llamacpp.temperature, 0.0, 2.0);
                check_range(&mut errors, "LLAMACPP_MAX_TOKENS", self.llamacpp.max_tokens, 1, 4000);
            }
            ProviderKind::Mock => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join(", ")))
        }
    }

    /// Client configuration for the OpenAI backend.
    pub fn openai_client_config(&self) -> OpenAIConfig {
        OpenAIConfig {
            provider: ProviderKind::OpenAI,
            base_url: self.openai.base_url.clone(),
            api_key: self.openai.api_key.clone(),
            gen_model: self.openai.model.clone(),
            embed_model: self.openai.embedding_model.clone(),
            embed_dimension: self.openai.embed_dimension,
            temperature: Some(self.openai.temperature),
            max_tokens: Some(self.openai.max_tokens),
            timeout_ms: self.request_timeout_ms,
            max_retries: self.max_retries,
            enable_logging: self.enable_logging,
        }
    }

    /// Client configuration for llama.cpp, served through its
    /// OpenAI-compatible `/v1` API without an API key.
    pub fn llamacpp_client_config(&self) -> OpenAIConfig {
        let base = self.llamacpp.base_url.trim_end_matches('/');
        OpenAIConfig {
            provider: ProviderKind::LlamaCpp,
            base_url: format!("{}/v1", base),
            api_key: None,
            gen_model: self.llamacpp.model.clone(),
            embed_model: self
                .llamacpp
                .embedding_model
                .clone()
                .unwrap_or_else(|| self.llamacpp.model.clone()),
            embed_dimension: self.llamacpp.embed_dimension,
            temperature: Some(self.llamacpp.temperature),
            max_tokens: Some(self.llamacpp.max_tokens),
            timeout_ms: self.request_timeout_ms,
            max_retries: self.max_retries,
            enable_logging: self.enable_logging,
        }
    }

    /// Client configuration for the Gemini backend.
    pub fn gemini_client_config(&self) -> GeminiConfig {
        GeminiConfig {
            base_url: self.gemini.base_url.clone(),
            api_key: self.gemini.api_key.clone().unwrap_or_default(),
            model: self.gemini.model.clone(),
            embed_model: self.gemini.embedding_model.clone(),
            embed_dimension: self.gemini.embed_dimension,
            temperature: Some(self.gemini.temperature),
            max_output_tokens: Some(self.gemini.max_output_tokens),
            timeout_ms: self.request_timeout_ms,
            max_retries: self.max_retries,
            enable_logging: self.enable_logging,
        }
    }
}

fn check_range<T>(errors: &mut Vec<String>, var: &str, value: T, min: T, max: T)
where
    T: PartialOrd + fmt::Display,
{
    if value < min || value > max {
        errors.push(format!("{} must be between {} and {}, got {}", var, min, max, value));
    }
}

fn check_url(errors: &mut Vec<String>, var: &str, url: &str) {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        errors.push(format!("{} must start with http:// or https://, got: {}", var, url));
    }
}

/// Reads values through the lookup and records parse failures.
struct EnvReader<'a, F> {
    lookup: &'a F,
    issues: Vec<(String, String)>,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.optional(var).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: FromStr>(&mut self, var: &str, default: T) -> T {
        match self.optional(var) {
            None => default,
            Some(raw) => match raw.parse() {
                Ok(v) => v,
                Err(_) => {
                    let err = ConfigError::InvalidValue {
                        var: var.to_string(),
                        value: raw,
                    };
                    self.issues.push((var.to_string(), err.to_string()));
                    default
                }
            },
        }
    }

    fn boolean(&mut self, var: &str, default: bool) -> bool {
        match self.optional(var).map(|v| v.to_lowercase()) {
            None => default,
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            Some(raw) => {
                let err = ConfigError::InvalidValue {
                    var: var.to_string(),
                    value: raw,
                };
                self.issues.push((var.to_string(), err.to_string()));
                default
            }
        }
    }
}
