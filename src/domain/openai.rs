//! The slices of the chat-completion wire format the proxy looks at
//!
//! Every decode here is best effort: bodies are forwarded byte-for-byte no
//! matter what, so a body that fails to decode just means nothing was
//! observed. The `Option` return types keep that policy visible.
//!
//! Decoding is also lenient per field: a `null` or mistyped field falls back
//! to its default instead of discarding the fields around it.

use crate::domain::metering::Usage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Inbound chat-completion request, reduced to the fields used for metering
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatRequest {
    #[serde(default, deserialize_with = "lenient")]
    pub model: String,
    #[serde(default, deserialize_with = "lenient")]
    pub stream: bool,
}

impl ChatRequest {
    pub fn decode(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    pub fn requested_model(&self) -> Option<&str> {
        Some(self.model.as_str()).filter(|model| !model.trim().is_empty())
    }
}

/// Non-streaming chat-completion response
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub model: String,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    pub fn decode(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice(body).ok()
    }
}

/// One `data:` payload of a streamed response
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamChunk {
    #[serde(default, deserialize_with = "lenient")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub model: String,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn decode(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

/// Decodes a field, substituting its default when the value has the wrong shape
///
/// Only the field itself is lenient; the surrounding document must still be
/// valid JSON.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}
