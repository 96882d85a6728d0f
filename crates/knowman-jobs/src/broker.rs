//! In-memory queue broker.
//!
//! Each queue keeps a priority heap of ready deliveries, a set of delayed
//! retries, the in-flight deliveries, and bounded rings of completed and
//! failed job ids. Workers long-poll [`MemoryBroker::dequeue`]; enqueues and
//! scheduled retries wake them through a per-queue [`Notify`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use knowman_core::{
    Broker, Delivery, Error, FailOutcome, JobType, QueueCounts, Result, RetryPolicy,
};

use crate::queue::QueueSet;

#[derive(Debug, Clone)]
struct Entry {
    job_id: Uuid,
    payload: JsonValue,
    priority: i32,
    seq: u64,
    attempt: u32,
}

impl Entry {
    fn delivery(&self, queue: JobType) -> Delivery {
        Delivery {
            queue,
            job_id: self.job_id,
            payload: self.payload.clone(),
            priority: self.priority,
            attempt: self.attempt,
        }
    }
}

/// Heap ordering: higher priority first, then lower sequence (earlier arrival).
#[derive(Debug)]
struct Ready(Entry);

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.seq == other.0.seq
    }
}

impl Eq for Ready {}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: BinaryHeap<Ready>,
    delayed: Vec<(Instant, Entry)>,
    active: HashMap<Uuid, Entry>,
    completed: VecDeque<Uuid>,
    failed: VecDeque<Uuid>,
}

impl QueueState {
    /// Move due retries into the ready heap.
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        let (due, pending): (Vec<_>, Vec<_>) = self
            .delayed
            .drain(..)
            .partition(|(ready_at, _)| *ready_at <= now);
        self.delayed = pending;
        for (_, entry) in due {
            self.ready.push(Ready(entry));
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }
}

struct Lane {
    state: Mutex<QueueState>,
    notify: Notify,
    retain_completed: usize,
    retain_failed: usize,
}

impl Lane {
    fn new(retain_completed: usize, retain_failed: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            retain_completed,
            retain_failed,
        }
    }
}

/// Process-local implementation of [`Broker`].
pub struct MemoryBroker {
    lanes: HashMap<JobType, Lane>,
    seq: AtomicU64,
}

impl MemoryBroker {
    /// Broker for the standard queue set.
    pub fn new() -> Self {
        Self::from_queues(&QueueSet::default())
    }

    /// One lane per descriptor, each keeping the descriptor's retention.
    pub fn from_queues(queues: &QueueSet) -> Self {
        let lanes = queues
            .iter()
            .map(|d| (d.queue, Lane::new(d.retain_completed, d.retain_failed)))
            .collect();
        Self {
            lanes,
            seq: AtomicU64::new(0),
        }
    }

    /// Broker keeping at most `completed`/`failed` finished job ids in every
    /// queue.
    pub fn with_retention(completed: usize, failed: usize) -> Self {
        let lanes = JobType::ALL
            .iter()
            .map(|&queue| (queue, Lane::new(completed, failed)))
            .collect();
        Self {
            lanes,
            seq: AtomicU64::new(0),
        }
    }

    fn lane(&self, queue: JobType) -> Result<&Lane> {
        self.lanes
            .get(&queue)
            .ok_or_else(|| Error::Broker(format!("Unknown queue: {}", queue)))
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(ring: &mut VecDeque<Uuid>, job_id: Uuid, cap: usize) {
    ring.push_back(job_id);
    while ring.len() > cap {
        ring.pop_front();
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(
        &self,
        queue: JobType,
        job_id: Uuid,
        payload: JsonValue,
        priority: i32,
    ) -> Result<()> {
        let lane = self.lane(queue)?;
        let entry = Entry {
            job_id,
            payload,
            priority,
            seq: self.next_seq(),
            attempt: 1,
        };
        {
            let mut state = lane.state.lock().await;
            state.ready.push(Ready(entry));
        }
        lane.notify.notify_waiters();
        trace!(queue = %queue, job_id = %job_id, priority, "Enqueued");
        Ok(())
    }

    async fn dequeue(&self, queue: JobType, wait: Duration) -> Result<Option<Delivery>> {
        let lane = self.lane(queue)?;
        let deadline = Instant::now() + wait;

        loop {
            let notified = lane.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = lane.state.lock().await;
                let now = Instant::now();
                state.promote_due(now);
                if let Some(Ready(entry)) = state.ready.pop() {
                    let delivery = entry.delivery(queue);
                    state.active.insert(entry.job_id, entry);
                    return Ok(Some(delivery));
                }
                if now >= deadline {
                    return Ok(None);
                }
                state.next_due()
            };

            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let lane = self.lane(delivery.queue)?;
        let mut state = lane.state.lock().await;
        state.active.remove(&delivery.job_id);
        push_bounded(&mut state.completed, delivery.job_id, lane.retain_completed);
        Ok(())
    }

    async fn fail(
        &self,
        delivery: &Delivery,
        error: &str,
        policy: Option<&RetryPolicy>,
    ) -> Result<FailOutcome> {
        let lane = self.lane(delivery.queue)?;
        let outcome = {
            let mut state = lane.state.lock().await;
            let entry = state
                .active
                .remove(&delivery.job_id)
                .unwrap_or_else(|| Entry {
                    job_id: delivery.job_id,
                    payload: delivery.payload.clone(),
                    priority: delivery.priority,
                    seq: 0,
                    attempt: delivery.attempt,
                });

            match policy.filter(|p| p.allows_retry(delivery.attempt)) {
                Some(policy) => {
                    let delay = policy.delay_for(delivery.attempt);
                    let next = Entry {
                        seq: self.next_seq(),
                        attempt: delivery.attempt + 1,
                        ..entry
                    };
                    state.delayed.push((Instant::now() + delay, next));
                    FailOutcome::Retrying {
                        attempt: delivery.attempt + 1,
                        delay,
                    }
                }
                None => {
                    push_bounded(&mut state.failed, delivery.job_id, lane.retain_failed);
                    FailOutcome::Exhausted
                }
            }
        };

        // Waiters recompute their wake-up time with the new delayed entry.
        lane.notify.notify_waiters();
        debug!(
            queue = %delivery.queue,
            job_id = %delivery.job_id,
            attempt = delivery.attempt,
            error,
            outcome = ?outcome,
            "Delivery failed"
        );
        Ok(outcome)
    }

    async fn remove(&self, queue: JobType, job_id: Uuid) -> Result<bool> {
        let lane = self.lane(queue)?;
        let mut state = lane.state.lock().await;

        let before = state.ready.len() + state.delayed.len();
        state.ready.retain(|Ready(entry)| entry.job_id != job_id);
        state.delayed.retain(|(_, entry)| entry.job_id != job_id);
        Ok(state.ready.len() + state.delayed.len() < before)
    }

    async fn counts(&self, queue: JobType) -> Result<QueueCounts> {
        let lane = self.lane(queue)?;
        let mut state = lane.state.lock().await;
        state.promote_due(Instant::now());
        Ok(QueueCounts {
            queue,
            waiting: state.ready.len(),
            active: state.active.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            delayed: state.delayed.len(),
        })
    }
}
