//! HTTP ingestion endpoint for metering events

use crate::collector::event_log::EventLog;
use crate::domain::{MeteringEvent, RequestId};
use crate::proxy::headers::paths;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Reasons an event is refused
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("missing request_id")]
    MissingRequestId,

    #[error("failed to append event: {0}")]
    Append(#[from] io::Error),
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidJson(_) | Self::MissingRequestId => StatusCode::BAD_REQUEST,
            Self::Append(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        if let Self::Append(e) = &self {
            error!(error = %e, "Event log write failed");
        }
        (self.status_code(), format!("{self}\n")).into_response()
    }
}

/// Wire form of an incoming event
///
/// Every field may be omitted, but fields the collector does not know
/// are rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IncomingEvent {
    pub request_id: String,
    pub tenant: String,
    pub app_key: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub latency_ms: u64,
    pub status_code: u16,
    pub ts: Option<DateTime<Utc>>,
    pub stream: bool,
}

impl IncomingEvent {
    pub fn decode(body: &[u8]) -> Result<Self, IngestError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Validate and stamp the event; a missing timestamp becomes `now`
    pub fn into_event(self, now: DateTime<Utc>) -> Result<MeteringEvent, IngestError> {
        if self.request_id.is_empty() {
            return Err(IngestError::MissingRequestId);
        }

        Ok(MeteringEvent {
            request_id: RequestId::new(self.request_id),
            tenant: self.tenant,
            app_key: self.app_key,
            provider: self.provider,
            model: self.model,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            latency_ms: self.latency_ms,
            status_code: self.status_code,
            at: self.ts.unwrap_or(now),
            stream: self.stream,
        })
    }
}

/// Telemetry sink service
pub struct Collector {
    log: Arc<EventLog>,
}

impl Collector {
    pub fn new(log: EventLog) -> Self {
        Self { log: Arc::new(log) }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(paths::HEALTH, any(health_handler))
            .route(paths::EVENTS, post(ingest_handler))
            .with_state(Arc::clone(&self.log))
            .layer(TraceLayer::new_for_http())
    }

    /// Flush the log; call after the server has stopped
    pub fn close(&self) -> io::Result<()> {
        self.log.close()
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ingest_handler(
    State(log): State<Arc<EventLog>>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), IngestError> {
    let event = IncomingEvent::decode(&body)?.into_event(Utc::now())?;
    log.append(&event)?;
    Ok((StatusCode::ACCEPTED, "accepted"))
}
