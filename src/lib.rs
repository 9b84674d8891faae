//! llm_meter - A metering reverse proxy for LLM chat-completion APIs
//!
//! Requests are forwarded to a single upstream without buffering the
//! response. Token usage is picked out of the response on the way through
//! and reported to a collector in the background, dropping events rather
//! than slowing clients down.

pub mod application;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metering;
pub mod mock_upstream;
pub mod proxy;

pub use application::{Application, CollectorApplication};
pub use error::{Error, Result};
