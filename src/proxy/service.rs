//! Main proxy service implementation
//!
//! The `ProxyService` owns everything shared between requests: the pooled
//! HTTP client, the metering queue and the dispatcher that drains it.
//!
//! ## Service Lifecycle
//!
//! ```rust,ignore
//! use llm_meter::config::ProxySettings;
//! use llm_meter::proxy::ProxyService;
//!
//! let mut service = ProxyService::new(ProxySettings::new()?);
//! service.start_dispatcher();
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, service.router()).await?;
//!
//! service.shutdown().await;
//! ```

use crate::config::ProxySettings;
use crate::metering::{DispatcherHandle, EventQueue, EventSink, HttpEventSink, MeteringDispatcher};
use crate::proxy::error_response::RequestFailure;
use crate::proxy::headers::paths;
use crate::proxy::hot_path::MeteringForwarder;
use crate::proxy::middleware::logging_middleware;
use crate::proxy::types::{build_http_client, HttpClient};
use axum::{
    body::Body,
    extract::{Request, State},
    middleware,
    response::Response,
    routing::any,
    Router,
};
use std::sync::Arc;
use tracing::info;

/// Metering proxy: router plus background delivery
pub struct ProxyService {
    settings: Arc<ProxySettings>,
    client: HttpClient,
    queue: Arc<EventQueue>,
    forwarder: MeteringForwarder,
    dispatcher: Option<DispatcherHandle>,
}

impl ProxyService {
    pub fn new(settings: ProxySettings) -> Self {
        Self::with_client(settings, build_http_client())
    }

    /// Build the service around an existing client
    pub fn with_client(settings: ProxySettings, client: HttpClient) -> Self {
        let settings = Arc::new(settings);
        let queue = Arc::new(EventQueue::new(settings.event_queue_size));
        let forwarder =
            MeteringForwarder::new(Arc::clone(&settings), client.clone(), Arc::clone(&queue));

        Self {
            settings,
            client,
            queue,
            forwarder,
            dispatcher: None,
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Queue shared by all request handlers
    pub fn event_queue(&self) -> Arc<EventQueue> {
        Arc::clone(&self.queue)
    }

    /// Start delivering events to the configured collector
    pub fn start_dispatcher(&mut self) {
        let sink = HttpEventSink::new(self.client.clone(), self.settings.collector_url.clone());
        self.start_dispatcher_with_sink(Arc::new(sink));
    }

    /// Start delivering events to `sink`; a running dispatcher is kept
    pub fn start_dispatcher_with_sink(&mut self, sink: Arc<dyn EventSink>) {
        if self.dispatcher.is_some() {
            return;
        }

        info!(collector_url = %self.settings.collector_url, "Starting metering dispatcher");
        self.dispatcher = Some(MeteringDispatcher::start(
            Arc::clone(&self.queue),
            sink,
            self.settings.event_flush_interval,
        ));
    }

    /// Create an Axum router for the proxy service with middleware
    pub fn router(&self) -> Router {
        Router::new()
            .route(paths::HEALTH, any(health_handler))
            .route(paths::CHAT_COMPLETIONS, any(chat_completions_handler))
            .with_state(self.forwarder.clone())
            .layer(middleware::from_fn(logging_middleware))
    }

    /// Stop the dispatcher after it delivers what is already queued
    pub async fn shutdown(mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown().await;
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn chat_completions_handler(
    State(forwarder): State<MeteringForwarder>,
    request: Request,
) -> Result<Response<Body>, RequestFailure> {
    forwarder.forward(request).await
}
