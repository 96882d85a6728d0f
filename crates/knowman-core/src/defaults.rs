//! Centralized default constants for the pipeline.
//!
//! Every crate references these constants instead of defining its own magic
//! numbers. Organized by domain area.

// =============================================================================
// CAPTURE
// =============================================================================

/// Characters of captured content kept on the item before extraction runs.
pub const CAPTURE_CONTENT_LIMIT: usize = 10_000;

/// Maximum characters of extracted content stored on an item.
pub const MAX_CONTENT_LENGTH: usize = 100_000;

/// Initial importance score of a captured item.
pub const INITIAL_IMPORTANCE_SCORE: f32 = 0.5;

/// Initial readability score of a captured item.
pub const INITIAL_READABILITY_SCORE: f32 = 0.5;

// =============================================================================
// ENRICHMENT
// =============================================================================

/// Default summary length cap in characters.
pub const SUMMARY_MAX_LENGTH: usize = 500;

/// Leading sentences kept by the offline summarizer.
pub const SUMMARY_SENTENCES: usize = 3;

/// Default number of tags requested per item.
pub const MAX_TAGS: usize = 5;

/// Embedding dimension of the offline backend.
pub const OFFLINE_EMBED_DIMENSION: usize = 384;

/// Characters of content considered by the offline embedder.
pub const OFFLINE_EMBED_CHARS: usize = 1000;

/// Readability score when average sentence length is under the threshold.
pub const READABILITY_EASY: f32 = 0.8;

/// Readability score otherwise.
pub const READABILITY_HARD: f32 = 0.5;

/// Words per sentence below which content counts as easy to read.
pub const READABILITY_WORDS_PER_SENTENCE: usize = 30;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default AI request timeout in milliseconds.
pub const AI_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default retry count handed to backend HTTP clients.
pub const AI_MAX_RETRIES: u32 = 3;

/// Timeout for backend health checks in seconds.
pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

/// Characters of content sent to a backend for summarization and embedding.
pub const BACKEND_CONTENT_CHARS: usize = 8000;

/// Characters of content sent to a backend for tagging.
pub const BACKEND_TAGGING_CHARS: usize = 4000;

/// Token cap for tag generation completions.
pub const TAGGING_MAX_TOKENS: u32 = 200;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default worker count per queue (tagging runs twice as many).
pub const PROCESSING_WORKERS: usize = 2;

/// Default per-job execution timeout in milliseconds.
pub const PROCESSING_TIMEOUT_MS: u64 = 30_000;

/// Default broker long-poll interval in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Completed jobs retained per broker queue.
pub const RETAIN_COMPLETED: usize = 100;

/// Failed jobs retained per broker queue.
pub const RETAIN_FAILED: usize = 1000;

/// Default retention window for terminal job records, in days.
pub const CLEANUP_OLDER_THAN_DAYS: i64 = 30;

/// Default page size for job listings.
pub const JOB_LIST_LIMIT: usize = 20;

/// Number of recent jobs in the status overview.
pub const RECENT_JOBS: usize = 10;

/// Error message recorded when a pending job is cancelled.
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

// =============================================================================
// EVENTS
// =============================================================================

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;
