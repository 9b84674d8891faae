//! Process-level wiring for the binaries
//!
//! Each application owns its settings, serves its router and releases its
//! resources once the shutdown signal arrives.

pub mod app;
pub mod collector_app;

pub use app::{shutdown_signal, Application};
pub use collector_app::CollectorApplication;
