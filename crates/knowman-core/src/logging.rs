//! Structured logging schema and field name constants for the pipeline.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same field names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback or retry applied |
//! | INFO  | Lifecycle events (startup, shutdown), job completions |
//! | DEBUG | Decision points, resolved providers, enqueue details |
//! | TRACE | Per-delivery broker detail |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "inference", "jobs", "pipeline"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "resolver", "openai", "gemini", "offline", "worker", "broker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "summarize", "generate_tags", "enqueue_stages", "dequeue"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Knowledge item UUID being enriched.
pub const ITEM_ID: &str = "item_id";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type (stage) name.
pub const JOB_TYPE: &str = "job_type";

/// Queue name.
pub const QUEUE: &str = "queue";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Attempt number of the current execution (1-based).
pub const ATTEMPT: &str = "attempt";

/// Backoff delay before the next attempt, in milliseconds.
pub const DELAY_MS: &str = "delay_ms";

/// Byte length of a prompt sent to a backend.
pub const PROMPT_LEN: &str = "prompt_len";

/// Embedding vector dimension.
pub const DIMENSION: &str = "dimension";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Provider identifier ("openai", "gemini", "llamacpp", "mock").
pub const PROVIDER: &str = "provider";

/// Model name used for inference.
pub const MODEL: &str = "model";

/// Capability being resolved ("main" or "embedding").
pub const CAPABILITY: &str = "capability";

/// Reason the offline backend replaced the configured one.
pub const FALLBACK_REASON: &str = "reason";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_snake_case() {
        for field in [
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            ITEM_ID,
            JOB_ID,
            JOB_TYPE,
            QUEUE,
            DURATION_MS,
            ATTEMPT,
            DELAY_MS,
            PROMPT_LEN,
            DIMENSION,
            PROVIDER,
            MODEL,
            CAPABILITY,
            FALLBACK_REASON,
            SUCCESS,
            ERROR_MSG,
        ] {
            assert!(field
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
