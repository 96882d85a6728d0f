//! Error types for the knowman pipeline.

use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// Result type alias using knowman's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Knowledge item not found
    #[error("Knowledge item {0} not found")]
    ItemNotFound(Uuid),

    /// Processing job not found
    #[error("Processing job {0} not found")]
    JobNotFound(Uuid),

    /// Job state machine rejected a transition
    #[error("Cannot {action} job {job_id} in status {from}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        action: &'static str,
    },

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Queue broker error
    #[error("Broker error: {0}")]
    Broker(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same operation can never succeed.
    ///
    /// Stage handlers use this to decide between a terminal failure and a
    /// retry under the queue's backoff policy.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::ItemNotFound(_)
                | Error::JobNotFound(_)
                | Error::InvalidTransition { .. }
                | Error::InvalidInput(_)
                | Error::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_item_not_found() {
        let id = Uuid::nil();
        let err = Error::ItemNotFound(id);
        assert_eq!(err.to_string(), format!("Knowledge item {} not found", id));
    }

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::new_v4();
        let err = Error::JobNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let id = Uuid::nil();
        let err = Error::InvalidTransition {
            job_id: id,
            from: JobStatus::Processing,
            action: "cancel",
        };
        assert_eq!(
            err.to_string(),
            format!("Cannot cancel job {} in status processing", id)
        );
    }

    #[test]
    fn test_error_display_inference() {
        let err = Error::Inference("model timeout".to_string());
        assert_eq!(err.to_string(), "Inference error: model timeout");
    }

    #[test]
    fn test_error_display_broker() {
        let err = Error::Broker("queue closed".to_string());
        assert_eq!(err.to_string(), "Broker error: queue closed");
    }

    #[test]
    fn test_permanent_errors() {
        assert!(Error::ItemNotFound(Uuid::nil()).is_permanent());
        assert!(Error::InvalidInput("bad".into()).is_permanent());
        assert!(Error::Serialization("bad".into()).is_permanent());
    }

    #[test]
    fn test_transient_errors() {
        assert!(!Error::Inference("rate limited".into()).is_permanent());
        assert!(!Error::Embedding("503".into()).is_permanent());
        assert!(!Error::Request("connection reset".into()).is_permanent());
        assert!(!Error::Timeout("30s".into()).is_permanent());
        assert!(!Error::Config("auth".into()).is_permanent());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
