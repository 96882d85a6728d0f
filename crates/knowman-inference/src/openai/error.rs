//! OpenAI-specific error handling.

use knowman_core::Error;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid authentication credentials.
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Request too large.
    ContextLengthExceeded,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401 | 403, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if the client should resend the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError)
    }
}

/// Convert an OpenAI error into a knowman [`Error`].
///
/// `embedding` selects [`Error::Embedding`] over [`Error::Inference`] for
/// non-configuration failures.
pub fn to_knowman_error(code: OpenAIErrorCode, message: &str, embedding: bool) -> Error {
    let wrap = |msg: String| {
        if embedding {
            Error::Embedding(msg)
        } else {
            Error::Inference(msg)
        }
    };
    match code {
        OpenAIErrorCode::AuthenticationError => {
            Error::Config(format!("Authentication failed: {}", message))
        }
        OpenAIErrorCode::RateLimitExceeded => wrap(format!("Rate limit exceeded: {}", message)),
        OpenAIErrorCode::ModelNotFound => Error::Config(format!("Model not found: {}", message)),
        OpenAIErrorCode::ContextLengthExceeded => {
            wrap(format!("Context too long: {}", message))
        }
        OpenAIErrorCode::ServerError => wrap(format!("Server error: {}", message)),
        OpenAIErrorCode::Unknown => wrap(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_401() {
        let code = OpenAIErrorCode::from_response(401, "invalid_api_key");
        assert_eq!(code, OpenAIErrorCode::AuthenticationError);
    }

    #[test]
    fn test_error_code_from_429() {
        let code = OpenAIErrorCode::from_response(429, "rate_limit_exceeded");
        assert_eq!(code, OpenAIErrorCode::RateLimitExceeded);
    }

    #[test]
    fn test_error_code_from_context_length() {
        let code = OpenAIErrorCode::from_response(400, "context_length_exceeded");
        assert_eq!(code, OpenAIErrorCode::ContextLengthExceeded);
    }

    #[test]
    fn test_error_code_from_502() {
        let code = OpenAIErrorCode::from_response(502, "bad_gateway");
        assert_eq!(code, OpenAIErrorCode::ServerError);
        assert!(code.is_retryable());
    }

    #[test]
    fn test_not_retryable_auth() {
        assert!(!OpenAIErrorCode::AuthenticationError.is_retryable());
        assert!(!OpenAIErrorCode::ModelNotFound.is_retryable());
    }

    #[test]
    fn test_auth_maps_to_config() {
        let err = to_knowman_error(OpenAIErrorCode::AuthenticationError, "Invalid key", false);
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Authentication failed"));
    }

    #[test]
    fn test_embedding_errors_use_embedding_variant() {
        let err = to_knowman_error(OpenAIErrorCode::ServerError, "boom", true);
        assert!(matches!(err, Error::Embedding(_)));
        let err = to_knowman_error(OpenAIErrorCode::RateLimitExceeded, "slow down", false);
        assert!(matches!(err, Error::Inference(_)));
    }
}
