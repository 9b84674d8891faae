//! Bounded lock-free queue between request handlers and the dispatcher
//!
//! Producers never block: when the queue is full the new event is discarded
//! and counted. The counter is cumulative for the life of the process.

use crate::config::QueueCapacity;
use crate::domain::MeteringEvent;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Result of offering an event to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    Dropped { total_dropped: u64 },
}

/// Statistics about queue usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
}

/// Fixed-capacity FIFO of pending metering events
pub struct EventQueue {
    queue: ArrayQueue<MeteringEvent>,
    ready: Notify,
    dropped: AtomicU64,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: QueueCapacity) -> Self {
        Self {
            queue: ArrayQueue::new(*capacity.as_ref()),
            ready: Notify::new(),
            dropped: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        }
    }

    /// Offer an event without blocking; a full queue drops it
    pub fn enqueue(&self, event: MeteringEvent) -> EnqueueOutcome {
        match self.queue.push(event) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                self.ready.notify_one();
                EnqueueOutcome::Queued
            }
            Err(_rejected) => {
                let total_dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                EnqueueOutcome::Dropped { total_dropped }
            }
        }
    }

    /// Take the oldest pending event, if any
    pub fn dequeue(&self) -> Option<MeteringEvent> {
        let event = self.queue.pop()?;
        self.dequeued.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }

    /// Wait until an enqueue has happened since the last wake-up
    ///
    /// A notification sent while nobody was waiting is kept, so an event
    /// pushed between `dequeue` returning `None` and this call is not missed.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn stats(&self) -> EventQueueStats {
        EventQueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
