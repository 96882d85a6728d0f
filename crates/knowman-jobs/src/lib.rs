//! # knowman-jobs
//!
//! Enrichment pipeline for knowman knowledge items.
//!
//! This crate provides:
//! - Priority queues per stage with broker-scheduled retry and backoff
//! - Worker pools with bounded concurrency and per-job timeouts
//! - The four stage handlers (extraction, summarization, tagging, embedding)
//! - An orchestrator for capture, retry, cancel and status queries
//! - In-memory store and broker implementations
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use knowman_jobs::{
//!     CaptureRequest, EventBus, MemoryBroker, Orchestrator, QueueSet, Store, WorkerConfig,
//! };
//! use knowman_inference::ProviderResolver;
//!
//! let events = EventBus::default();
//! let providers = Arc::new(ProviderResolver::from_env().with_events(events.clone()));
//! let queues = QueueSet::default();
//! let orchestrator = Orchestrator::new(
//!     Store::in_memory(),
//!     Arc::new(MemoryBroker::from_queues(&queues)),
//!     queues,
//!     providers,
//!     events,
//! );
//!
//! let handle = orchestrator.worker_builder(WorkerConfig::from_env()).build().start();
//! let outcome = orchestrator
//!     .capture(CaptureRequest::new("Title", "Some text. More text."))
//!     .await?;
//!
//! // Listen for events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {}", event.event_type);
//! }
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod broker;
pub mod handler;
pub mod html;
pub mod orchestrator;
pub mod queue;
pub mod stages;
pub mod store;
pub mod worker;

// Re-export core types
pub use knowman_core::*;

pub use broker::MemoryBroker;
pub use handler::{JobContext, JobHandler, JobResult};
pub use orchestrator::{
    CaptureOutcome, CaptureRequest, JobTotals, Orchestrator, StageFlags, StatusOverview,
};
pub use queue::{QueueDescriptor, QueueSet};
pub use stages::{
    stage_handlers, EmbeddingHandler, ExtractionHandler, StageDeps, SummarizationHandler,
    TaggingHandler,
};
pub use store::{MemoryItemRepository, MemoryJobRepository, MemoryTagRepository, Store};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerHandle};
