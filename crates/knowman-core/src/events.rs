//! Pipeline event types, envelope schema, and event bus.
//!
//! Workers and the provider resolver publish lifecycle events into a single
//! broadcast channel. Consumers (CLI progress output, tests, future
//! streaming surfaces) subscribe independently.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::JobType;

// ============================================================================
// Event Envelope
// ============================================================================

/// Versioned envelope around a [`PipelineEvent`].
///
/// The `event_type` field uses dot-namespaced names (e.g. `"job.started"`,
/// `"item.updated"`). Consumers should ignore unknown fields.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type.
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Type of entity this event relates to (`"job"`, `"item"`, `"provider"`).
    pub entity_type: &'static str,
    /// ID of the entity this event relates to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    /// Payload schema version.
    pub payload_version: u32,
    /// Domain-specific event data.
    pub payload: PipelineEvent,
}

impl EventEnvelope {
    pub fn new(event: PipelineEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            entity_type: event.entity_type(),
            entity_id: event.entity_id(),
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Pipeline Event (domain payloads)
// ============================================================================

/// Pipeline event, serialized with a `type` tag field, e.g.
/// `{"type":"JobStarted","job_id":"...","job_type":"tagging",...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A job record was created and handed to the broker.
    JobQueued {
        job_id: Uuid,
        job_type: JobType,
        item_id: Uuid,
        priority: i32,
    },
    /// A worker picked the job up.
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
        item_id: Uuid,
        attempt: u32,
    },
    /// The attempt failed and the broker scheduled another one.
    JobRetrying {
        job_id: Uuid,
        job_type: JobType,
        item_id: Uuid,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        job_type: JobType,
        item_id: Uuid,
        duration_ms: u64,
    },
    /// A job failed terminally.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        item_id: Uuid,
        error: String,
    },
    /// A pending job was cancelled.
    JobCancelled {
        job_id: Uuid,
        job_type: JobType,
        item_id: Uuid,
    },
    /// A stage merged its output into a knowledge item.
    ItemUpdated { item_id: Uuid, stage: JobType },
    /// The configured backend was replaced by the offline one.
    ProviderFallback {
        capability: String,
        requested: String,
        reason: String,
    },
}

impl PipelineEvent {
    /// Short event name, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::JobQueued { .. } => "JobQueued",
            PipelineEvent::JobStarted { .. } => "JobStarted",
            PipelineEvent::JobRetrying { .. } => "JobRetrying",
            PipelineEvent::JobCompleted { .. } => "JobCompleted",
            PipelineEvent::JobFailed { .. } => "JobFailed",
            PipelineEvent::JobCancelled { .. } => "JobCancelled",
            PipelineEvent::ItemUpdated { .. } => "ItemUpdated",
            PipelineEvent::ProviderFallback { .. } => "ProviderFallback",
        }
    }

    /// Namespaced event type for the envelope (e.g. `"job.retrying"`).
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            PipelineEvent::JobQueued { .. } => "job.queued",
            PipelineEvent::JobStarted { .. } => "job.started",
            PipelineEvent::JobRetrying { .. } => "job.retrying",
            PipelineEvent::JobCompleted { .. } => "job.completed",
            PipelineEvent::JobFailed { .. } => "job.failed",
            PipelineEvent::JobCancelled { .. } => "job.cancelled",
            PipelineEvent::ItemUpdated { .. } => "item.updated",
            PipelineEvent::ProviderFallback { .. } => "provider.fallback",
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            PipelineEvent::ItemUpdated { .. } => "item",
            PipelineEvent::ProviderFallback { .. } => "provider",
            _ => "job",
        }
    }

    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            PipelineEvent::JobQueued { job_id, .. }
            | PipelineEvent::JobStarted { job_id, .. }
            | PipelineEvent::JobRetrying { job_id, .. }
            | PipelineEvent::JobCompleted { job_id, .. }
            | PipelineEvent::JobFailed { job_id, .. }
            | PipelineEvent::JobCancelled { job_id, .. } => Some(*job_id),
            PipelineEvent::ItemUpdated { item_id, .. } => Some(*item_id),
            PipelineEvent::ProviderFallback { .. } => None,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus.
///
/// Slow receivers that fall behind get a `Lagged` error and miss events.
/// Emitting with no subscribers drops the event.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: PipelineEvent) {
        let envelope = EventEnvelope::new(event);
        let subscriber_count = self.tx.receiver_count();
        tracing::trace!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count,
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive enveloped events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
