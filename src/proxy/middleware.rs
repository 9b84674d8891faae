//! Middleware implementations for the proxy service

use crate::proxy::headers::{header_str, X_LLM_REQUEST_ID};
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info};

/// Logs one summary line per request once response headers are ready
///
/// Streamed bodies are still being relayed when this fires, so the
/// duration is time to first byte, not total latency.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    debug!(method = %method, path = %path, "Incoming request");

    let response = next.run(request).await;

    let request_id = header_str(response.headers(), X_LLM_REQUEST_ID);
    info!(
        request_id = if request_id.is_empty() { "-" } else { request_id },
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn passes_responses_through_unchanged() {
        let app = Router::new()
            .route(
                "/teapot",
                get(|| async { (StatusCode::IM_A_TEAPOT, [(X_LLM_REQUEST_ID, "req_1")], "short") }),
            )
            .layer(middleware::from_fn(logging_middleware));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/teapot")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers().get(X_LLM_REQUEST_ID).unwrap(), "req_1");
    }
}
