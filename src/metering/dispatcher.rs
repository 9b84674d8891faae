//! Background delivery of queued metering events

use crate::domain::MeteringEvent;
use crate::metering::queue::EventQueue;
use crate::metering::sink::EventSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Single consumer that drains the queue into a sink
pub struct MeteringDispatcher {
    queue: Arc<EventQueue>,
    sink: Arc<dyn EventSink>,
    flush_interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Running dispatcher task
pub struct DispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop the dispatcher after it delivers what is already queued
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Metering dispatcher task failed");
        }
    }

}

impl MeteringDispatcher {
    pub fn new(
        queue: Arc<EventQueue>,
        sink: Arc<dyn EventSink>,
        flush_interval: Duration,
    ) -> (Self, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let dispatcher = Self {
            queue,
            sink,
            flush_interval,
            shutdown_rx,
        };

        (dispatcher, shutdown_tx)
    }

    /// Spawn the dispatcher on the current runtime
    pub fn start(
        queue: Arc<EventQueue>,
        sink: Arc<dyn EventSink>,
        flush_interval: Duration,
    ) -> DispatcherHandle {
        let (dispatcher, shutdown_tx) = Self::new(queue, sink, flush_interval);
        DispatcherHandle {
            shutdown_tx,
            task: tokio::spawn(dispatcher.run()),
        }
    }

    /// Deliver events until a shutdown signal arrives or every sender is gone
    ///
    /// One event is delivered per iteration. Shutdown and the drop report are
    /// checked before every delivery, so a queue that never empties cannot
    /// starve either of them.
    pub async fn run(mut self) {
        info!(
            flush_interval = ?self.flush_interval,
            queue_capacity = self.queue.capacity(),
            "Metering dispatcher started"
        );

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.flush_interval,
            self.flush_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => break,
                _ = ticker.tick() => self.report_dropped(),
                event = next_event(&self.queue) => self.deliver(event).await,
            }
        }

        // Only what was queued at shutdown; producers may still be running
        for _ in 0..self.queue.len() {
            match self.queue.dequeue() {
                Some(event) => self.deliver(event).await,
                None => break,
            }
        }

        let stats = self.queue.stats();
        info!(
            enqueued_events = stats.enqueued,
            dequeued_events = stats.dequeued,
            dropped_events = stats.dropped,
            "Metering dispatcher stopped"
        );
    }

    async fn deliver(&self, event: MeteringEvent) {
        match self.sink.deliver(&event).await {
            Ok(()) => debug!(request_id = %event.request_id, "Metering event delivered"),
            Err(e) => warn!(
                request_id = %event.request_id,
                error = %e,
                "Failed to deliver metering event"
            ),
        }
    }

    fn report_dropped(&self) {
        let stats = self.queue.stats();
        if stats.dropped > 0 {
            warn!(
                dropped_events = stats.dropped,
                enqueued_events = stats.enqueued,
                pending_events = self.queue.len(),
                "Metering events dropped on full queue"
            );
        }
    }
}

/// Wait for the next event; dropping this future never loses one
async fn next_event(queue: &EventQueue) -> MeteringEvent {
    loop {
        if let Some(event) = queue.dequeue() {
            return event;
        }
        queue.ready().await;
    }
}
