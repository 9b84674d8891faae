//! Stand-in for the upstream chat-completions API
//!
//! Used by integration tests and the `mock_openai` binary. Answers with a
//! fixed completion and usage of 7 prompt, 3 completion, 10 total tokens.

use crate::proxy::headers::{content_types::TEXT_EVENT_STREAM, paths, CONTENT_TYPE};
use axum::{
    body::{Body, Bytes},
    http::header::CACHE_CONTROL,
    response::{IntoResponse, Response},
    routing::{any, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;

pub const MOCK_ID: &str = "mock-1";
pub const MOCK_PROMPT_TOKENS: u64 = 7;
pub const MOCK_COMPLETION_TOKENS: u64 = 3;
pub const MOCK_TOTAL_TOKENS: u64 = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MockRequest {
    model: String,
    stream: bool,
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamOptions {
    include_usage: bool,
}

pub fn router() -> Router {
    Router::new()
        .route(paths::CHAT_COMPLETIONS, post(chat_completions))
        .route(paths::HEALTH, any(|| async { "ok" }))
}

async fn chat_completions(body: Bytes) -> Response {
    let request: MockRequest = serde_json::from_slice(&body).unwrap_or_default();

    if request.stream {
        let include_usage = request
            .stream_options
            .as_ref()
            .is_some_and(|options| options.include_usage);
        return stream_response(&request.model, include_usage);
    }

    Json(completion(&request.model)).into_response()
}

fn usage() -> Value {
    json!({
        "prompt_tokens": MOCK_PROMPT_TOKENS,
        "completion_tokens": MOCK_COMPLETION_TOKENS,
        "total_tokens": MOCK_TOTAL_TOKENS,
    })
}

fn completion(model: &str) -> Value {
    json!({
        "id": MOCK_ID,
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": "ok-from-mock" },
            "finish_reason": "stop",
        }],
        "usage": usage(),
    })
}

fn chunk(model: &str, choices: Value, usage: Option<Value>) -> Value {
    let mut chunk = json!({
        "id": MOCK_ID,
        "object": "chat.completion.chunk",
        "model": model,
        "choices": choices,
    });
    if let Some(usage) = usage {
        chunk["usage"] = usage;
    }
    chunk
}

/// Event-stream frames the mock sends for a streamed request
pub fn stream_frames(model: &str, include_usage: bool) -> Vec<String> {
    let mut chunks = vec![
        chunk(model, json!([{ "index": 0, "delta": { "role": "assistant" } }]), None),
        chunk(
            model,
            json!([{ "index": 0, "delta": { "content": "hello-from-mock" } }]),
            None,
        ),
    ];
    if include_usage {
        chunks.push(chunk(model, json!([]), Some(usage())));
    }

    chunks
        .iter()
        .map(|chunk| format!("data: {chunk}\n\n"))
        .chain(std::iter::once("data: [DONE]\n\n".to_string()))
        .collect()
}

fn stream_response(model: &str, include_usage: bool) -> Response {
    let frames = stream_frames(model, include_usage)
        .into_iter()
        .map(|frame| Ok::<_, Infallible>(Bytes::from(frame)));

    (
        [(CONTENT_TYPE, TEXT_EVENT_STREAM), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(futures_util::stream::iter(frames)),
    )
        .into_response()
}
