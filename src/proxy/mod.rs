//! Proxy module for metering LLM chat-completion requests
//!
//! This module implements the dual-path architecture:
//! - Hot path: requests are forwarded and responses relayed without buffering
//! - Metering path: usage events are queued and delivered in the background

pub mod capture;
pub mod error_response;
pub mod headers;
pub mod hot_path;
pub mod middleware;
pub mod service;
pub mod streaming;
pub mod types;

pub use service::ProxyService;
pub use types::{ProxyError, ProxyResult};
