//! Per-request forwarding for chat completions
//!
//! Response headers are returned to the client as soon as the upstream
//! sends them. The body is produced by a relay task writing into an
//! in-memory pipe, so the handler never waits on the body.
//!
//! The metering outcome is owned by a [`PendingEvent`] from the moment the
//! upstream request exists. Whoever settles it enqueues the event: the
//! handler on a connectivity failure, the relay task once the body is done.
//! If the handler is dropped first (the client went away while waiting for
//! upstream headers) the guard records an upstream failure instead.

use crate::config::{CaptureLimit, ProxySettings};
use crate::domain::{
    first_non_blank, ChatRequest, ChatResponse, MeteringContext, MeteringEvent, RequestId,
    Usage, DEFAULT_TENANT, STATUS_UPSTREAM_FAILED,
};
use crate::metering::{EnqueueOutcome, EventQueue};
use crate::proxy::capture::{copy_with_capture, BoundedCapture};
use crate::proxy::error_response::RequestFailure;
use crate::proxy::headers::{
    bearer_token, content_types::APPLICATION_JSON, header_str, is_hop_by_hop, AUTHORIZATION,
    BEARER_SCHEME, CONTENT_TYPE, PASSTHROUGH_HEADERS, TENANT_HEADERS, X_LLM_REQUEST_ID,
};
use crate::proxy::streaming::{relay_event_stream, StreamTelemetry};
use crate::proxy::types::*;
use axum::body::Body;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

/// Forwards chat-completion requests upstream and meters each attempt
#[derive(Clone)]
pub struct MeteringForwarder {
    settings: Arc<ProxySettings>,
    upstream_url: Arc<str>,
    client: HttpClient,
    queue: Arc<EventQueue>,
}

impl MeteringForwarder {
    pub fn new(settings: Arc<ProxySettings>, client: HttpClient, queue: Arc<EventQueue>) -> Self {
        let upstream_url = Arc::from(settings.chat_completions_url());
        Self {
            settings,
            upstream_url,
            client,
            queue,
        }
    }

    /// Handle one inbound request
    ///
    /// Client input errors return before anything is metered. Once the
    /// upstream request is built exactly one event is enqueued, even if this
    /// future is dropped before upstream answers.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, RequestFailure> {
        let start = Instant::now();
        let (parts, body) = request.into_parts();

        if parts.method != Method::POST {
            return Err(ProxyError::MethodNotAllowed(parts.method).into());
        }

        let request_id = RequestId::generate();
        let fail = |error: ProxyError| RequestFailure {
            error,
            request_id: Some(request_id.clone()),
        };

        let app_key = bearer_token(header_str(&parts.headers, AUTHORIZATION.as_str()));
        if app_key.is_empty() {
            return Err(fail(ProxyError::MissingBearerToken));
        }

        let body = read_body(body).await.map_err(&fail)?;
        let chat = ChatRequest::decode(&body).unwrap_or_default();

        let context = MeteringContext {
            request_id: request_id.clone(),
            tenant: resolve_tenant(&parts.headers).to_string(),
            app_key: app_key.to_string(),
            requested_model: chat.requested_model().map(str::to_string),
            stream: chat.stream,
        };

        let upstream_request = self
            .upstream_request(&parts.headers, body)
            .map_err(&fail)?;
        let pending = PendingEvent::new(context, Arc::clone(&self.queue), start);

        let timeout = self.settings.http_client_timeout;
        let response = match tokio::time::timeout(timeout, self.client.request(upstream_request))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(request_id = %request_id, error = ?e, "Upstream request failed");
                pending.upstream_failed();
                return Err(fail(ProxyError::UpstreamUnavailable(e.to_string())));
            }
            Err(_) => {
                pending.upstream_failed();
                return Err(fail(ProxyError::UpstreamTimeout(timeout)));
            }
        };

        Ok(self.relay_response(pending, response))
    }

    fn upstream_request(
        &self,
        inbound: &HeaderMap,
        body: Bytes,
    ) -> ProxyResult<Request<Full<Bytes>>> {
        let credential = format!(
            "{BEARER_SCHEME} {}",
            self.settings.upstream_api_key.as_ref()
        );

        let mut builder = Request::post(&*self.upstream_url)
            .header(CONTENT_TYPE, APPLICATION_JSON)
            .header(AUTHORIZATION, credential);

        for name in PASSTHROUGH_HEADERS {
            if let Some(value) = inbound.get(name).filter(|value| !value.is_empty()) {
                builder = builder.header(name, value.clone());
            }
        }

        Ok(builder.body(Full::new(body))?)
    }

    fn relay_response(&self, pending: PendingEvent, upstream: Response<Incoming>) -> Response<Body> {
        let (parts, body) = upstream.into_parts();
        let (client_end, relay_end) = tokio::io::duplex(RELAY_PIPE_BYTES);

        let mut response = Response::new(Body::from_stream(ReaderStream::new(client_end)));
        *response.status_mut() = parts.status;
        copy_response_headers(&parts.headers, response.headers_mut());
        if let Ok(value) = HeaderValue::from_str(pending.context.request_id.as_ref()) {
            response.headers_mut().insert(X_LLM_REQUEST_ID, value);
        }

        let relay = BodyRelay {
            pending,
            status: parts.status,
            capture_limit: self.settings.capture_bytes,
        };
        tokio::spawn(relay.run(body, relay_end));

        response
    }
}

/// The one metering event owed for a request that reached upstream dispatch
///
/// Dropping it unsettled records an upstream failure.
struct PendingEvent {
    context: MeteringContext,
    queue: Arc<EventQueue>,
    start: Instant,
    settled: bool,
}

impl PendingEvent {
    fn new(context: MeteringContext, queue: Arc<EventQueue>, start: Instant) -> Self {
        Self {
            context,
            queue,
            start,
            settled: false,
        }
    }

    fn settle(&mut self, status_code: u16, model: Option<&str>, usage: Option<Usage>) {
        if self.settled {
            return;
        }
        self.settled = true;
        let event = self
            .context
            .finish(status_code, elapsed_ms(self.start), model, usage);
        enqueue(&self.queue, event);
    }

    fn upstream_failed(mut self) {
        self.settle(STATUS_UPSTREAM_FAILED, None, None);
    }
}

impl Drop for PendingEvent {
    fn drop(&mut self) {
        if !self.settled {
            debug!(
                request_id = %self.context.request_id,
                "Request abandoned before upstream responded"
            );
            self.settle(STATUS_UPSTREAM_FAILED, None, None);
        }
    }
}

/// Background half of a forwarded response
struct BodyRelay {
    pending: PendingEvent,
    status: StatusCode,
    capture_limit: CaptureLimit,
}

impl BodyRelay {
    async fn run(mut self, body: Incoming, mut client: DuplexStream) {
        let upstream = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
        tokio::pin!(upstream);

        let (model, usage, result) = if self.pending.context.stream {
            let mut telemetry = StreamTelemetry::default();
            let result = relay_event_stream(&mut upstream, &mut client, &mut telemetry).await;
            (telemetry.model().map(str::to_string), telemetry.usage(), result)
        } else {
            let mut capture = BoundedCapture::new(self.capture_limit);
            let result = copy_with_capture(&mut upstream, &mut client, &mut capture)
                .await
                .map(|_| ());
            let (model, usage) = parse_captured(capture.bytes());
            (model, usage, result)
        };

        if let Err(e) = result {
            warn!(
                request_id = %self.pending.context.request_id,
                status = self.status.as_u16(),
                stream = self.pending.context.stream,
                error = %e,
                "Response relay aborted"
            );
        }

        self.pending.settle(self.status.as_u16(), model.as_deref(), usage);

        // End of body for the client, after the event is queued
        let _ = client.shutdown().await;
    }
}

async fn read_body(body: Body) -> ProxyResult<Bytes> {
    Limited::new(body, MAX_REQUEST_BODY_BYTES)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                ProxyError::RequestTooLarge {
                    max_size: MAX_REQUEST_BODY_BYTES,
                }
            } else {
                ProxyError::UnreadableBody(e.to_string())
            }
        })
}

fn resolve_tenant(headers: &HeaderMap) -> &str {
    first_non_blank(TENANT_HEADERS.map(|name| Some(header_str(headers, name))))
        .unwrap_or(DEFAULT_TENANT)
}

fn copy_response_headers(upstream: &HeaderMap, client: &mut HeaderMap) {
    for (name, value) in upstream {
        if !is_hop_by_hop(name.as_str()) {
            client.append(name.clone(), value.clone());
        }
    }
}

fn parse_captured(captured: &[u8]) -> (Option<String>, Option<Usage>) {
    match ChatResponse::decode(captured) {
        Some(response) => (Some(response.model), response.usage),
        None => (None, None),
    }
}

fn enqueue(queue: &EventQueue, event: MeteringEvent) {
    let request_id = event.request_id.clone();
    match queue.enqueue(event) {
        EnqueueOutcome::Queued => debug!(request_id = %request_id, "Metering event queued"),
        EnqueueOutcome::Dropped { total_dropped } => debug!(
            request_id = %request_id,
            dropped_events = total_dropped,
            "Metering queue full, event dropped"
        ),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
