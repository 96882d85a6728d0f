//! # knowman-core
//!
//! Core types, traits, and abstractions for the knowman enrichment pipeline.
//!
//! This crate provides the knowledge item and job record models, the job
//! state machine, the shared error type, the event bus, and the collaborator
//! traits that the inference and jobs crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, PipelineEvent};
pub use models::*;
pub use traits::*;
