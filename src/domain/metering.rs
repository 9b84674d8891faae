//! Metering records produced once per upstream request attempt

use crate::domain::openai::lenient;
use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider name stamped on every event; the proxy targets a single upstream
pub const PROVIDER_OPENAI: &str = "openai";

/// Tenant used when the caller supplies no tenant hint
pub const DEFAULT_TENANT: &str = "default";

/// Model name used when neither the response nor the request names one
pub const UNKNOWN_MODEL: &str = "unknown";

/// Status code recorded when the upstream call failed before any response
pub const STATUS_UPSTREAM_FAILED: u16 = 0;

/// Opaque per-request identifier, `req_` followed by 32 hex digits
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self::new(format!("req_{}", Uuid::now_v7().simple()))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Token counts reported by the upstream
///
/// Missing, null or mistyped counters decode as zero. "No usage observed" is
/// modelled as `Option<Usage>::None` by callers, never as a zeroed `Usage`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, deserialize_with = "lenient")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub completion_tokens: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub total_tokens: u64,
}

/// One telemetry record per accepted request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeteringEvent {
    pub request_id: RequestId,
    pub tenant: String,
    pub app_key: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub latency_ms: u64,
    pub status_code: u16,
    #[serde(rename = "ts")]
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl MeteringEvent {
    /// Token counters from `usage`, or zeros when nothing was observed
    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        let usage = usage.unwrap_or_default();
        self.prompt_tokens = usage.prompt_tokens;
        self.completion_tokens = usage.completion_tokens;
        self.total_tokens = usage.total_tokens;
        self
    }
}

/// Request-scoped facts known before the upstream call is made
#[derive(Debug, Clone)]
pub struct MeteringContext {
    pub request_id: RequestId,
    pub tenant: String,
    pub app_key: String,
    pub requested_model: Option<String>,
    pub stream: bool,
}

impl MeteringContext {
    /// Build the event for a terminal outcome.
    ///
    /// The model resolves from what the response reported, then what the
    /// request asked for, then [`UNKNOWN_MODEL`].
    pub fn finish(
        &self,
        status_code: u16,
        latency_ms: u64,
        observed_model: Option<&str>,
        usage: Option<Usage>,
    ) -> MeteringEvent {
        let model = first_non_blank([observed_model, self.requested_model.as_deref()])
            .unwrap_or(UNKNOWN_MODEL)
            .to_string();

        MeteringEvent {
            request_id: self.request_id.clone(),
            tenant: self.tenant.clone(),
            app_key: self.app_key.clone(),
            provider: PROVIDER_OPENAI.to_string(),
            model,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            latency_ms,
            status_code,
            at: Utc::now(),
            stream: self.stream,
        }
        .with_usage(usage)
    }
}

/// First value that is not empty after trimming, returned untrimmed
pub fn first_non_blank<'a, I>(values: I) -> Option<&'a str>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    values
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(requested_model: Option<&str>) -> MeteringContext {
        MeteringContext {
            request_id: RequestId::generate(),
            tenant: DEFAULT_TENANT.to_string(),
            app_key: "abc".to_string(),
            requested_model: requested_model.map(str::to_string),
            stream: false,
        }
    }

    #[test]
    fn request_ids_are_unique_and_prefixed() {
        let first = RequestId::generate();
        let second = RequestId::generate();
        assert_ne!(first, second);
        assert!(first.as_ref().starts_with("req_"));
        assert_eq!(first.as_ref().len(), 4 + 32);
    }

    #[test]
    fn model_prefers_observed_then_requested_then_unknown() {
        let ctx = context(Some("gpt-4"));
        assert_eq!(ctx.finish(200, 1, Some("gpt-4o"), None).model, "gpt-4o");
        assert_eq!(ctx.finish(200, 1, Some(""), None).model, "gpt-4");
        assert_eq!(ctx.finish(200, 1, None, None).model, "gpt-4");
        assert_eq!(context(None).finish(200, 1, None, None).model, UNKNOWN_MODEL);
        assert_eq!(context(Some("  ")).finish(200, 1, None, None).model, UNKNOWN_MODEL);
    }

    #[test]
    fn missing_usage_means_zero_counters() {
        let event = context(None).finish(STATUS_UPSTREAM_FAILED, 12, None, None);
        assert_eq!(event.prompt_tokens, 0);
        assert_eq!(event.completion_tokens, 0);
        assert_eq!(event.total_tokens, 0);
        assert_eq!(event.status_code, 0);
        assert_eq!(event.provider, PROVIDER_OPENAI);
    }

    #[test]
    fn usage_is_copied_onto_event() {
        let usage = Usage {
            prompt_tokens: 7,
            completion_tokens: 3,
            total_tokens: 10,
        };
        let event = context(None).finish(200, 5, Some("gpt-4"), Some(usage));
        assert_eq!(event.prompt_tokens, 7);
        assert_eq!(event.completion_tokens, 3);
        assert_eq!(event.total_tokens, 10);
    }

    #[test]
    fn event_serializes_with_wire_names() {
        let mut event = context(Some("gpt-4")).finish(200, 5, None, None);
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("ts").is_some());
        assert!(json.get("request_id").is_some());
        assert!(json.get("stream").is_none(), "false stream flag is omitted");

        event.stream = true;
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stream"], serde_json::json!(true));
    }

    #[test]
    fn first_non_blank_skips_whitespace() {
        assert_eq!(first_non_blank([Some(""), Some("b"), Some("c")]), Some("b"));
        assert_eq!(first_non_blank([Some(""), Some(" ")]), None);
        assert_eq!(first_non_blank([None, Some(" x ")]), Some(" x "));
    }
}
