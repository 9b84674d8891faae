//! Telemetry sink for metering events
//!
//! Accepts events over HTTP and appends them to a durable line-oriented log.

pub mod event_log;
pub mod server;

pub use event_log::EventLog;
pub use server::{Collector, IncomingEvent, IngestError};
