//! Worker pools that drain the stage queues.
//!
//! One pool per queue, each with the queue's configured number of slots.
//! A slot long-polls the broker, marks the job `processing`, runs the stage
//! handler under the per-job timeout, and records the outcome on both the
//! job record and the broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use knowman_core::{
    defaults, Broker, Delivery, Error, EventBus, EventEnvelope, FailOutcome, JobType,
    PipelineEvent, Result, RetryPolicy,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::queue::QueueSet;
use crate::store::Store;

/// Configuration for the worker pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Base slot count per queue (tagging runs twice as many).
    pub workers: usize,
    /// Per-job timeout in milliseconds.
    pub timeout_ms: u64,
    /// How long a slot waits on an empty queue before checking again.
    pub poll_interval_ms: u64,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: defaults::PROCESSING_WORKERS,
            timeout_ms: defaults::PROCESSING_TIMEOUT_MS,
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `PROCESSING_WORKERS` | `2` | Slots per queue (tagging: double) |
    /// | `PROCESSING_TIMEOUT` | `30000` | Per-job timeout in ms |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Long-poll interval on an empty queue |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let enabled = lookup("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(defaults.enabled);

        let workers = lookup("PROCESSING_WORKERS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(defaults.workers)
            .max(1);

        let timeout_ms = lookup("PROCESSING_TIMEOUT")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&ms| ms > 0)
            .unwrap_or(defaults.timeout_ms);

        let poll_interval_ms = lookup("JOB_POLL_INTERVAL_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(defaults.poll_interval_ms);

        Self {
            workers,
            timeout_ms,
            poll_interval_ms,
            enabled,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Handle for controlling running worker pools.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    events: EventBus,
}

impl WorkerHandle {
    /// Stop taking new deliveries, let in-flight jobs finish, and wait for
    /// every slot to exit.
    pub async fn shutdown(self) -> Result<()> {
        // An Err means every slot already exited.
        let _ = self.shutdown_tx.send(true);
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Worker supervisor failed: {}", e)))
    }

    /// Get a receiver for pipeline events.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Worker pools over every queue with a registered handler.
pub struct JobWorker {
    store: Store,
    broker: Arc<dyn Broker>,
    queues: QueueSet,
    config: WorkerConfig,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    events: EventBus,
}

impl JobWorker {
    /// Spawn the pools and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let events = self.events.clone();
        let worker = Arc::new(self);

        let task = tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            task,
            events,
        }
    }

    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker", op = "run"))]
    async fn run(self: Arc<Self>, shutdown_rx: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        let mut slots = JoinSet::new();
        for descriptor in self.queues.iter() {
            if !self.handlers.contains_key(&descriptor.queue) {
                warn!(queue = %descriptor.queue, "No handler registered, queue not served");
                continue;
            }
            for slot in 0..descriptor.concurrency {
                let worker = Arc::clone(&self);
                let shutdown = shutdown_rx.clone();
                let queue = descriptor.queue;
                slots.spawn(async move { worker.run_slot(queue, slot, shutdown).await });
            }
        }

        info!(
            slots = slots.len(),
            timeout_ms = self.config.timeout_ms,
            poll_interval_ms = self.config.poll_interval_ms,
            "Job worker started"
        );

        while let Some(result) = slots.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Worker slot panicked");
            }
        }

        info!("Job worker stopped");
    }

    async fn run_slot(&self, queue: JobType, slot: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(queue = %queue, slot, "Worker slot started");
        let poll_interval = self.config.poll_interval();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                next = self.broker.dequeue(queue, poll_interval) => next,
            };

            match next {
                Ok(Some(delivery)) => self.execute(delivery).await,
                Ok(None) => {}
                Err(e) => {
                    error!(queue = %queue, error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = sleep(poll_interval) => {}
                    }
                }
            }
        }

        debug!(queue = %queue, slot, "Worker slot stopped");
    }

    /// Execute a single delivery and record its outcome.
    #[instrument(skip(self, delivery), fields(subsystem = "jobs", component = "worker", op = "execute", queue = %delivery.queue, job_id = %delivery.job_id, attempt = delivery.attempt))]
    async fn execute(&self, delivery: Delivery) {
        let started = Instant::now();
        let job_id = delivery.job_id;
        let job_type = delivery.queue;

        let job = match self.store.jobs.start(job_id).await {
            Ok(job) => job,
            Err(e) if e.is_permanent() => {
                // Cancelled or deleted after it was queued.
                warn!(error = %e, "Dropping delivery for job that cannot start");
                if let Err(e) = self.broker.ack(&delivery).await {
                    error!(error = %e, "Failed to acknowledge dropped delivery");
                }
                return;
            }
            Err(e) => {
                self.redeliver_unstarted(&delivery, e).await;
                return;
            }
        };
        let item_id = job.knowledge_item_id;

        info!(item_id = %item_id, attempts = job.attempts, "Processing job");
        self.events.emit(PipelineEvent::JobStarted {
            job_id,
            job_type,
            item_id,
            attempt: job.attempts,
        });

        let result = match self.handlers.get(&job_type) {
            Some(handler) => {
                let ctx = JobContext::new(job, delivery.clone());
                match tokio::time::timeout(self.config.timeout(), handler.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(timeout_ms = self.config.timeout_ms, "Job exceeded timeout");
                        JobResult::Retry(format!(
                            "Job exceeded timeout of {}ms",
                            self.config.timeout_ms
                        ))
                    }
                }
            }
            None => JobResult::Failed(format!("No handler for job type: {}", job_type)),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            JobResult::Success(output) => {
                if let Err(e) = self.store.jobs.complete(job_id, output).await {
                    error!(error = %e, "Failed to mark job as completed");
                    let error = format!("Failed to record completion: {}", e);
                    self.record_failure(&delivery, item_id, error, None).await;
                    return;
                }
                if let Err(e) = self.broker.ack(&delivery).await {
                    error!(error = %e, "Failed to acknowledge delivery");
                }
                info!(item_id = %item_id, duration_ms, "Job completed successfully");
                self.events.emit(PipelineEvent::JobCompleted {
                    job_id,
                    job_type,
                    item_id,
                    duration_ms,
                });
            }
            JobResult::Retry(error) => {
                let policy = self.queues.retry_policy(job_type);
                self.record_failure(&delivery, item_id, error, Some(policy))
                    .await;
            }
            JobResult::Failed(error) => {
                self.record_failure(&delivery, item_id, error, None).await;
            }
        }
    }

    /// The record could not be moved to `processing` for a transient reason.
    /// Hand the delivery back under the queue's retry policy.
    async fn redeliver_unstarted(&self, delivery: &Delivery, error: Error) {
        let policy = self.queues.retry_policy(delivery.queue);
        let error = error.to_string();
        match self.broker.fail(delivery, &error, Some(policy)).await {
            Ok(FailOutcome::Retrying { attempt, delay }) => {
                warn!(
                    next_attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "Job could not start, retry scheduled"
                );
            }
            // The record never left `pending`.
            Ok(FailOutcome::Exhausted) => {
                error!(%error, "Job could not start and has no attempts left");
            }
            Err(e) => error!(error = %e, "Broker rejected failure report"),
        }
    }

    async fn record_failure(
        &self,
        delivery: &Delivery,
        item_id: Uuid,
        error: String,
        policy: Option<&RetryPolicy>,
    ) {
        let job_id = delivery.job_id;
        let job_type = delivery.queue;

        let outcome = match self.broker.fail(delivery, &error, policy).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Broker rejected failure report");
                FailOutcome::Exhausted
            }
        };

        match outcome {
            FailOutcome::Retrying { attempt, delay } => {
                let delay_ms = delay.as_millis() as u64;
                warn!(
                    item_id = %item_id,
                    next_attempt = attempt,
                    delay_ms,
                    %error,
                    "Job failed, retry scheduled"
                );
                self.events.emit(PipelineEvent::JobRetrying {
                    job_id,
                    job_type,
                    item_id,
                    attempt,
                    delay_ms,
                    error,
                });
            }
            FailOutcome::Exhausted => {
                if let Err(e) = self.store.jobs.fail(job_id, &error).await {
                    error!(error = %e, "Failed to mark job as failed");
                    return;
                }
                warn!(item_id = %item_id, %error, permanent = policy.is_none(), "Job failed");
                self.events.emit(PipelineEvent::JobFailed {
                    job_id,
                    job_type,
                    item_id,
                    error,
                });
            }
        }
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    store: Store,
    broker: Arc<dyn Broker>,
    queues: Option<QueueSet>,
    config: WorkerConfig,
    handlers: Vec<Arc<dyn JobHandler>>,
    events: EventBus,
}

impl WorkerBuilder {
    pub fn new(store: Store, broker: Arc<dyn Broker>) -> Self {
        Self {
            store,
            broker,
            queues: None,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
            events: EventBus::default(),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Queue descriptors. Defaults to the standard set sized by the
    /// configured worker count.
    pub fn with_queues(mut self, queues: QueueSet) -> Self {
        self.queues = Some(queues);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Add a handler. A later handler for the same job type replaces an
    /// earlier one.
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_handlers<I>(mut self, handlers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn JobHandler>>,
    {
        self.handlers.extend(handlers);
        self
    }

    /// Build and return the worker.
    pub fn build(self) -> JobWorker {
        let queues = self
            .queues
            .unwrap_or_else(|| QueueSet::standard(self.config.workers));

        let mut handlers = HashMap::new();
        for handler in self.handlers {
            let job_type = handler.job_type();
            debug!(job_type = %job_type, "Registered job handler");
            handlers.insert(job_type, handler);
        }

        JobWorker {
            store: self.store,
            broker: self.broker,
            queues,
            config: self.config,
            handlers,
            events: self.events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn config_from(pairs: &[(&str, &str)]) -> WorkerConfig {
        let map: Map<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_worker_config_default_values() {
        let config = WorkerConfig::default();
        assert_eq!(config.workers, 2);
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.poll_interval_ms, 500);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_from_lookup() {
        let config = config_from(&[
            ("PROCESSING_WORKERS", "4"),
            ("PROCESSING_TIMEOUT", "1500"),
            ("JOB_POLL_INTERVAL_MS", "50"),
            ("JOB_WORKER_ENABLED", "false"),
        ]);
        assert_eq!(config.workers, 4);
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert!(!config.enabled);
    }

    #[test]
    fn test_worker_config_bad_values_keep_defaults() {
        let config = config_from(&[
            ("PROCESSING_WORKERS", "many"),
            ("PROCESSING_TIMEOUT", "0"),
            ("JOB_WORKER_ENABLED", "yes"),
        ]);
        assert_eq!(config, WorkerConfig::default());

        assert_eq!(config_from(&[("PROCESSING_WORKERS", "0")]).workers, 1);
    }

    #[test]
    fn test_worker_config_chaining() {
        let config = WorkerConfig::default()
            .with_workers(3)
            .with_timeout_ms(100)
            .with_poll_interval(10)
            .with_enabled(false);

        assert_eq!(config.workers, 3);
        assert_eq!(config.timeout_ms, 100);
        assert_eq!(config.poll_interval_ms, 10);
        assert!(!config.enabled);
    }

    #[test]
    fn test_builder_defaults_queue_set_to_worker_count() {
        let worker = WorkerBuilder::new(Store::in_memory(), Arc::new(crate::MemoryBroker::new()))
            .with_config(WorkerConfig::default().with_workers(3))
            .build();
        assert_eq!(worker.queues, QueueSet::standard(3));
        assert!(worker.handlers.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_worker_exits_immediately() {
        let worker = WorkerBuilder::new(Store::in_memory(), Arc::new(crate::MemoryBroker::new()))
            .with_config(WorkerConfig::default().with_enabled(false))
            .build();
        let handle = worker.start();
        handle.shutdown().await.unwrap();
    }
}
