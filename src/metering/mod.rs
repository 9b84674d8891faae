//! Metering event pipeline
//!
//! Request handlers push finished events into a bounded [`EventQueue`]
//! without ever waiting. A single [`MeteringDispatcher`] task drains the
//! queue into an [`EventSink`], logging and discarding failed deliveries.

pub mod dispatcher;
pub mod queue;
pub mod sink;

pub use dispatcher::{DispatcherHandle, MeteringDispatcher};
pub use queue::{EnqueueOutcome, EventQueue, EventQueueStats};
pub use sink::{DeliveryError, EventSink, HttpEventSink};
