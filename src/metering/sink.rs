//! Delivery of metering events to the collector

use crate::domain::MeteringEvent;
use crate::proxy::headers::{content_types::APPLICATION_JSON, CONTENT_TYPE};
use crate::proxy::types::{HttpClient, COLLECTOR_TIMEOUT};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use std::time::Duration;
use thiserror::Error;

/// Most of a rejection body kept for the error message
const MAX_ERROR_BODY_BYTES: usize = 4 * 1024;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid collector request: {0}")]
    Request(#[from] http::Error),

    #[error("collector unreachable: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("collector did not answer within {0:?}")]
    Timeout(Duration),

    #[error("collector responded {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Destination for metering events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &MeteringEvent) -> Result<(), DeliveryError>;
}

/// Posts each event as JSON to the collector's ingestion endpoint
#[derive(Clone)]
pub struct HttpEventSink {
    client: HttpClient,
    url: String,
    timeout: Duration,
}

impl HttpEventSink {
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: COLLECTOR_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post(&self, payload: Vec<u8>) -> Result<(), DeliveryError> {
        let request = Request::post(self.url.as_str())
            .header(CONTENT_TYPE, APPLICATION_JSON)
            .body(Full::new(Bytes::from(payload)))?;

        let response = self.client.request(request).await?;
        let status = response.status();
        if status.is_success() {
            // Consume the body so the connection goes back to the pool
            let _ = response.into_body().collect().await;
            return Ok(());
        }

        let body = read_prefix(response.into_body(), MAX_ERROR_BODY_BYTES).await;
        Err(DeliveryError::Rejected { status, body })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn deliver(&self, event: &MeteringEvent) -> Result<(), DeliveryError> {
        let payload = serde_json::to_vec(event)?;
        tokio::time::timeout(self.timeout, self.post(payload))
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))?
    }
}

async fn read_prefix(body: Incoming, limit: usize) -> String {
    let mut frames = body.into_data_stream();
    let mut prefix = Vec::new();

    while prefix.len() < limit {
        match frames.next().await {
            Some(Ok(chunk)) => {
                let take = chunk.len().min(limit - prefix.len());
                prefix.extend_from_slice(&chunk[..take]);
            }
            _ => break,
        }
    }

    String::from_utf8_lossy(&prefix).trim().to_string()
}
