//! Job handler contract shared by the stage handlers.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use knowman_core::{Delivery, Error, Job, JobType};

/// Context provided to job handlers.
pub struct JobContext {
    /// The job record as marked `processing` for this attempt.
    pub job: Job,
    /// The broker delivery being executed.
    pub delivery: Delivery,
}

impl JobContext {
    pub fn new(job: Job, delivery: Delivery) -> Self {
        Self { job, delivery }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn item_id(&self) -> Uuid {
        self.job.knowledge_item_id
    }

    /// Broker delivery attempt, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.delivery.attempt
    }

    /// Job input. The delivery payload wins; the stored input covers
    /// deliveries that arrived without one.
    pub fn input(&self) -> &JsonValue {
        if self.delivery.payload.is_null() {
            &self.job.input
        } else {
            &self.delivery.payload
        }
    }

    /// Deserialize the job input. A malformed payload is a permanent error.
    pub fn parse_input<T: DeserializeOwned>(&self) -> knowman_core::Result<T> {
        serde_json::from_value(self.input().clone()).map_err(|e| {
            Error::InvalidInput(format!(
                "Invalid {} payload for job {}: {}",
                self.job.job_type, self.job.id, e
            ))
        })
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Job completed successfully with its output.
    Success(JsonValue),
    /// Permanent failure; no further attempts.
    Failed(String),
    /// Transient failure; retried per the queue's policy.
    Retry(String),
}

impl JobResult {
    /// Classify a handler error by [`Error::is_permanent`].
    pub fn from_error(error: &Error) -> Self {
        if error.is_permanent() {
            JobResult::Failed(error.to_string())
        } else {
            JobResult::Retry(error.to_string())
        }
    }
}

impl From<knowman_core::Result<JsonValue>> for JobResult {
    fn from(result: knowman_core::Result<JsonValue>) -> Self {
        match result {
            Ok(output) => JobResult::Success(output),
            Err(e) => JobResult::from_error(&e),
        }
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn context(input: JsonValue, payload: JsonValue) -> JobContext {
        let job = Job::new(Uuid::now_v7(), JobType::Summarization, 5, input);
        let delivery = Delivery {
            queue: JobType::Summarization,
            job_id: job.id,
            payload,
            priority: 5,
            attempt: 2,
        };
        JobContext::new(job, delivery)
    }

    #[derive(Debug, Deserialize)]
    struct Input {
        content: String,
    }

    #[test]
    fn test_context_accessors() {
        let ctx = context(json!({"content": "stored"}), json!({"content": "delivered"}));
        assert_eq!(ctx.job_id(), ctx.job.id);
        assert_eq!(ctx.item_id(), ctx.job.knowledge_item_id);
        assert_eq!(ctx.attempt(), 2);
        assert_eq!(ctx.parse_input::<Input>().unwrap().content, "delivered");
    }

    #[test]
    fn test_input_falls_back_to_stored() {
        let ctx = context(json!({"content": "stored"}), JsonValue::Null);
        assert_eq!(ctx.parse_input::<Input>().unwrap().content, "stored");
    }

    #[test]
    fn test_bad_payload_is_permanent() {
        let ctx = context(json!({}), json!({"nope": 1}));
        let err = ctx.parse_input::<Input>().unwrap_err();
        assert!(err.is_permanent());
        assert!(err.to_string().contains("summarization"));
    }

    #[test]
    fn test_from_error_classification() {
        assert_eq!(
            JobResult::from_error(&Error::Inference("503".into())),
            JobResult::Retry("Inference error: 503".into())
        );
        let missing = Uuid::now_v7();
        assert!(matches!(
            JobResult::from_error(&Error::ItemNotFound(missing)),
            JobResult::Failed(_)
        ));
        assert_eq!(
            JobResult::from(Ok(json!({"ok": true}))),
            JobResult::Success(json!({"ok": true}))
        );
    }
}
