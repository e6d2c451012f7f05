//! Gateway error taxonomy with stable codes and HTTP statuses.
//!
//! Every failure the client can observe maps to one [`GatewayError`] variant
//! with a stable `code` string and an HTTP status. The `Responder`
//! implementation renders the spec'd error envelope
//! `{ "error": { "code", "message", "details"? }, "status_code" }`, so
//! handlers simply `?` their way out. Messages are safe for display: no stack
//! traces, no internal paths.
//!
//! # Examples
//!
//! ```rust
//! use modelgate::error::GatewayError;
//! use modelgate::responder::Responder;
//! use http::StatusCode;
//!
//! let err = GatewayError::UnsupportedType { mime: "application/x-msdownload".into() };
//! assert_eq!(err.code(), "unsupported-type");
//! assert_eq!(err.into_response().status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
//! ```

use http::{HeaderValue, StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::responder::{Json, Responder};

/// All client-observable failures.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Malformed JSON, missing fields, bad enum values.
    #[error("{message}")]
    Validation { message: String },

    /// Missing or invalid API key when one is required.
    #[error("missing or invalid API key")]
    Unauthorized,

    /// Identity cannot access the referenced resource.
    #[error("access to {what} is not permitted")]
    Forbidden { what: String },

    /// Unknown file id or route.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Upload or message payload exceeds the configured cap.
    #[error("payload exceeds the configured limit of {limit_bytes} bytes")]
    PayloadTooLarge { limit_bytes: u64 },

    /// Detected MIME outside the allow-list.
    #[error("unsupported content type: {mime}")]
    UnsupportedType { mime: String },

    /// Token bucket empty; carries the reset hint in seconds.
    #[error("rate limit exceeded")]
    RateLimited { reset_secs: u64 },

    /// CPU pool queue full, or circuit open with no fallback.
    #[error("service is busy, retry later")]
    ServerBusy,

    /// Provider returned non-2xx after retries.
    #[error("upstream provider error: {message}")]
    UpstreamError { provider: String, message: String },

    /// Deadline exceeded while waiting on a provider.
    #[error("upstream provider timed out")]
    UpstreamTimeout { provider: String },

    /// Unexpected fault; correlate with the request id.
    #[error("internal error")]
    Internal { request_id: String },
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "validation-error",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::Forbidden { .. } => "forbidden",
            GatewayError::NotFound { .. } => "not-found",
            GatewayError::PayloadTooLarge { .. } => "payload-too-large",
            GatewayError::UnsupportedType { .. } => "unsupported-type",
            GatewayError::RateLimited { .. } => "rate-limited",
            GatewayError::ServerBusy => "server-busy",
            GatewayError::UpstreamError { .. } => "upstream-error",
            GatewayError::UpstreamTimeout { .. } => "upstream-timeout",
            GatewayError::Internal { .. } => "internal-error",
        }
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden { .. } => StatusCode::FORBIDDEN,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UnsupportedType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ServerBusy => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Optional structured details included in the error envelope.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            GatewayError::PayloadTooLarge { limit_bytes } => {
                Some(json!({ "limit_bytes": limit_bytes }))
            }
            GatewayError::UnsupportedType { mime } => Some(json!({ "detected_mime": mime })),
            GatewayError::RateLimited { reset_secs } => Some(json!({ "reset_secs": reset_secs })),
            GatewayError::UpstreamError { provider, .. }
            | GatewayError::UpstreamTimeout { provider } => Some(json!({ "provider": provider })),
            GatewayError::Internal { request_id } if !request_id.is_empty() => {
                Some(json!({ "request_id": request_id }))
            }
            _ => None,
        }
    }
}

impl Responder for GatewayError {
    fn into_response(self) -> crate::types::Response {
        let status = self.status();
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }

        let body = json!({
            "error": error,
            "status_code": status.as_u16(),
        });

        let mut res = (status, Json(body)).into_response();

        if let GatewayError::RateLimited { reset_secs } = self
            && let Ok(value) = HeaderValue::from_str(&reset_secs.to_string())
        {
            res.headers_mut().insert(http::header::RETRY_AFTER, value);
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses_are_stable() {
        let cases: Vec<(GatewayError, &str, StatusCode)> = vec![
            (
                GatewayError::Validation {
                    message: "bad".into(),
                },
                "validation-error",
                StatusCode::BAD_REQUEST,
            ),
            (
                GatewayError::Unauthorized,
                "unauthorized",
                StatusCode::UNAUTHORIZED,
            ),
            (
                GatewayError::PayloadTooLarge { limit_bytes: 10 },
                "payload-too-large",
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                GatewayError::RateLimited { reset_secs: 42 },
                "rate-limited",
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                GatewayError::ServerBusy,
                "server-busy",
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                GatewayError::UpstreamTimeout {
                    provider: "openai".into(),
                },
                "upstream-timeout",
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.status(), status);
        }
    }

    #[test]
    fn rate_limited_response_has_retry_after() {
        let res = GatewayError::RateLimited { reset_secs: 17 }.into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get("retry-after").unwrap(), "17");
    }
}
