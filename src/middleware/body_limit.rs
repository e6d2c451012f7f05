//! Per-route request body size limits.
//!
//! Rejects oversized requests early from the Content-Length header with the
//! taxonomy's `payload-too-large`. The upload path re-enforces its cap while
//! consuming the stream (chunked uploads carry no length header), so this
//! middleware is the fast path, not the only line.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::header::CONTENT_LENGTH;

use crate::error::GatewayError;
use crate::middleware::{IntoMiddleware, Next};
use crate::responder::Responder;
use crate::types::{Request, Response};

/// Request body size limiting middleware configuration.
pub struct BodyLimit<F>
where
    F: Fn(&Request) -> u64 + Send + Sync + 'static,
{
    limit: Option<u64>,
    dynamic_limit: Option<F>,
}

impl<F> BodyLimit<F>
where
    F: Fn(&Request) -> u64 + Send + Sync + 'static,
{
    /// Creates a body limit middleware with a fixed size limit.
    pub fn new(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            dynamic_limit: None,
        }
    }

    /// Creates a body limit middleware with a per-request limit function.
    pub fn with_dynamic_limit(f: F) -> Self {
        Self {
            limit: None,
            dynamic_limit: Some(f),
        }
    }
}

impl<F> IntoMiddleware for BodyLimit<F>
where
    F: Fn(&Request) -> u64 + Send + Sync + 'static,
{
    fn into_middleware(
        self,
    ) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>
    + Clone
    + Send
    + Sync
    + 'static {
        let static_limit = self.limit;
        let dynamic_limit = self.dynamic_limit.map(Arc::new);

        move |req: Request, next: Next| {
            let dynamic_limit = dynamic_limit.clone();

            Box::pin(async move {
                let limit = dynamic_limit
                    .as_ref()
                    .map(|f| f(&req))
                    .or(static_limit)
                    .unwrap_or(10 * 1024 * 1024);

                if let Some(len) = req
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    && len > limit
                {
                    return GatewayError::PayloadTooLarge { limit_bytes: limit }.into_response();
                }

                next.run(req).await.into_response()
            })
        }
    }
}
