//! Type definitions for the proxy module

use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use thiserror::Error;

// ========== Constants ==========

/// Largest request body accepted from callers
pub const MAX_REQUEST_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Buffer between a response relay task and the client body
pub const RELAY_PIPE_BYTES: usize = 64 * 1024;

/// Upper bound for one delivery to the collector
pub const COLLECTOR_TIMEOUT: Duration = Duration::from_millis(800);

/// Connection pool tuning shared by upstream and collector traffic
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
pub const POOL_MAX_IDLE_PER_HOST: usize = 200;

// ========== HTTP Client ==========

/// Pooled HTTP/HTTPS client used for every outbound call
pub type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Build the process-wide client. Clones share one connection pool.
pub fn build_http_client() -> HttpClient {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(CONNECT_TIMEOUT));
    http.set_keepalive(Some(TCP_KEEPALIVE));
    http.set_nodelay(true);

    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build(https)
}

// ========== Error Types ==========

/// Failures the proxy reports to its own callers
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("method {0} not allowed")]
    MethodNotAllowed(http::Method),

    #[error("missing bearer token")]
    MissingBearerToken,

    #[error("request body exceeds {max_size} bytes")]
    RequestTooLarge { max_size: usize },

    #[error("failed to read request body: {0}")]
    UnreadableBody(String),

    #[error("failed to build upstream request: {0}")]
    UpstreamRequest(#[from] http::Error),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),
}

pub type ProxyResult<T> = Result<T, ProxyError>;
