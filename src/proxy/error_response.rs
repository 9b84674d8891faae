//! Unified error response handling for the proxy service
//!
//! Every failure the proxy produces itself, as opposed to upstream errors
//! passed through verbatim, is rendered the same way: a JSON body with a
//! stable code plus the request identifier header when one was assigned.

use crate::domain::RequestId;
use crate::proxy::headers::X_LLM_REQUEST_ID;
use crate::proxy::types::ProxyError;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Unique error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Request ID for correlation
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Convert to HTTP response with proper headers
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        let request_id = self.request_id.clone();
        let mut response = (status, Json(self)).into_response();

        if let Some(id) = request_id {
            if let Ok(header_value) = HeaderValue::from_str(&id) {
                response
                    .headers_mut()
                    .insert(X_LLM_REQUEST_ID, header_value);
            }
        }

        response
    }
}

/// Extension trait for consistent error formatting
pub trait ErrorResponseExt {
    fn to_error_response(&self) -> ErrorResponse;

    fn status_code(&self) -> StatusCode;
}

impl ErrorResponseExt for ProxyError {
    fn to_error_response(&self) -> ErrorResponse {
        use ProxyError::*;

        let code = match self {
            MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            MissingBearerToken => "UNAUTHORIZED",
            RequestTooLarge { .. } => "REQUEST_TOO_LARGE",
            UnreadableBody(_) => "BAD_REQUEST",
            UpstreamRequest(_) => "INTERNAL_ERROR",
            UpstreamUnavailable(_) => "BAD_GATEWAY",
            UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
        };
        ErrorResponse::new(code, self.to_string())
    }

    fn status_code(&self) -> StatusCode {
        use ProxyError::*;

        match self {
            MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            MissingBearerToken => StatusCode::UNAUTHORIZED,
            RequestTooLarge { .. } | UnreadableBody(_) => StatusCode::BAD_REQUEST,
            UpstreamRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            UpstreamUnavailable(_) | UpstreamTimeout(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.to_error_response()
            .into_response_with_status(self.status_code())
    }
}

/// A proxy failure tied to the request identifier it was assigned, if any
#[derive(Debug)]
pub struct RequestFailure {
    pub error: ProxyError,
    pub request_id: Option<RequestId>,
}

impl From<ProxyError> for RequestFailure {
    fn from(error: ProxyError) -> Self {
        Self {
            error,
            request_id: None,
        }
    }
}

impl IntoResponse for RequestFailure {
    fn into_response(self) -> Response {
        let mut body = self.error.to_error_response();
        if let Some(id) = self.request_id {
            body = body.with_request_id(id.into_inner());
        }
        body.into_response_with_status(self.error.status_code())
    }
}
