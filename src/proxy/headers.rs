//! HTTP header constants and utilities for the proxy service
//!
//! This module centralizes the header names the proxy reads, forwards and
//! adds, along with the helpers that interpret them.

use ::http::{header, HeaderMap};

/// Response header carrying the proxy-assigned request identifier
pub const X_LLM_REQUEST_ID: &str = "x-llm-request-id";

/// Tenant hint headers, in precedence order
pub const TENANT_HEADERS: [&str; 2] = ["x-llm-tenant", "x-tenant"];

/// Inbound headers forwarded to the upstream when non-empty
pub const PASSTHROUGH_HEADERS: [&str; 3] =
    ["openai-organization", "openai-beta", "openai-project"];

/// Headers that only describe a single connection leg
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Authorization scheme accepted from callers
pub const BEARER_SCHEME: &str = "Bearer";

/// Standard header re-exports for convenience
pub use header::{AUTHORIZATION, CONTENT_TYPE};

/// Well-known paths
pub mod paths {
    /// Liveness endpoint
    pub const HEALTH: &str = "/healthz";

    /// Chat completions, on both the proxy and the upstream
    pub const CHAT_COMPLETIONS: &str = "/v1/chat/completions";

    /// Collector ingestion endpoint
    pub const EVENTS: &str = "/events";
}

/// Common content types
pub mod content_types {
    pub const APPLICATION_JSON: &str = "application/json";
    pub const TEXT_EVENT_STREAM: &str = "text/event-stream";
}

/// Token from an `Authorization: Bearer <token>` value, empty when absent
pub fn bearer_token(authorization: &str) -> &str {
    let authorization = authorization.trim();
    match authorization.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case(BEARER_SCHEME) => token.trim(),
        _ => "",
    }
}

/// Whether `name` must not be relayed between connection legs
pub fn is_hop_by_hop(name: &str) -> bool {
    let name = name.trim();
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// String value of a header, or `""` when missing or not visible ASCII
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}
