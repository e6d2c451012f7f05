//! Security filter: API-key auth, input sanitization, response hardening.
//!
//! Applied to every inbound request ahead of the rate limiter. The API-key
//! check compares SHA-256 digests through `subtle` so timing never leaks key
//! prefixes; `/health` stays unauthenticated. Response-side, every reply gets
//! the hardening headers, with a strict CSP on HTML responses only (JSON and
//! event streams do not execute).

use http::{HeaderValue, header};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{
    error::GatewayError,
    middleware::Next,
    responder::Responder,
    types::{Request, Response},
};

/// Constant-time equality over SHA-256 digests of the two values.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    da.as_slice().ct_eq(db.as_slice()).into()
}

/// Rejects strings with embedded NUL and strips other control characters
/// (TAB and LF survive). Applied to client-supplied string fields.
pub fn sanitize_field(value: &str) -> Result<String, GatewayError> {
    if value.contains('\0') {
        return Err(GatewayError::Validation {
            message: "field contains NUL".to_string(),
        });
    }
    Ok(value
        .chars()
        .filter(|c| !c.is_control() || *c == '\t' || *c == '\n')
        .collect())
}

/// API-key middleware; a `None` expected key disables auth entirely.
pub fn api_key_guard(
    header_name: String,
    expected: Option<String>,
) -> impl Fn(
    Request,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send + 'static>>
+ Clone
+ Send
+ Sync
+ 'static {
    move |req: Request, next: Next| {
        let header_name = header_name.clone();
        let expected = expected.clone();
        Box::pin(async move {
            let Some(expected) = expected else {
                return next.run(req).await;
            };

            // Liveness stays reachable for probes without credentials.
            if req.uri().path() == "/health" {
                return next.run(req).await;
            }

            let presented = req
                .headers()
                .get(header_name.as_str())
                .and_then(|v| v.to_str().ok());

            match presented {
                Some(key) if constant_time_eq(key, &expected) => next.run(req).await,
                _ => GatewayError::Unauthorized.into_response(),
            }
        })
    }
}

/// Response hardening headers, CSP only for HTML bodies.
pub fn security_headers(
) -> impl Fn(
    Request,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send + 'static>>
+ Clone
+ Send
+ Sync
+ 'static {
    move |req: Request, next: Next| {
        Box::pin(async move {
            let mut res = next.run(req).await;
            let headers = res.headers_mut();
            headers.insert(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            );
            headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
            headers.insert(
                header::REFERRER_POLICY,
                HeaderValue::from_static("no-referrer"),
            );

            let is_html = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with("text/html"));
            if is_html {
                headers.insert(
                    header::CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static(
                        "default-src 'none'; frame-ancestors 'none'; base-uri 'none'",
                    ),
                );
            }
            res
        })
    }
}
