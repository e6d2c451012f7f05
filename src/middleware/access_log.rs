//! Access log middleware: one structured event per request.
//!
//! Runs early in the chain so it observes the final response of everything
//! downstream, including rate-limit rejections and handler errors. Routing
//! telemetry (selected model, complexity score, cache hits, fallbacks) is
//! attached to response extensions by the chat handlers and folded into the
//! event here; status-class counters update at the same point.

use std::sync::Arc;

use http::header::CONTENT_LENGTH;
use http_body::Body;

use crate::{
    context::RequestContext,
    metrics::{Metrics, RequestEvent, RouteTelemetry},
    middleware::Next,
    types::{Request, Response},
};

/// Builds the access-log middleware over the shared metrics registry.
pub fn access_log(
    metrics: Arc<Metrics>,
) -> impl Fn(
    Request,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send + 'static>>
+ Clone
+ Send
+ Sync
+ 'static {
    move |req: Request, next: Next| {
        let metrics = metrics.clone();
        Box::pin(async move {
            let method = req.method().to_string();
            let path = req.uri().path().to_string();
            let bytes_in = req
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            let ctx = req.extensions().get::<RequestContext>().cloned();

            let res = next.run(req).await;

            let status = res.status().as_u16();
            metrics.record_status(status);

            let telemetry = res
                .extensions()
                .get::<RouteTelemetry>()
                .cloned()
                .unwrap_or_default();

            let (request_id, identity, latency_ms) = match &ctx {
                Some(ctx) => (
                    ctx.request_id.clone(),
                    ctx.identity.key(),
                    ctx.started_at.elapsed().as_millis() as u64,
                ),
                None => (String::new(), String::new(), 0),
            };

            RequestEvent {
                request_id,
                identity,
                method,
                path,
                status,
                latency_ms,
                bytes_in,
                bytes_out: res.body().size_hint().exact().unwrap_or(0),
                selected_model: telemetry.selected_model,
                complexity_score: telemetry.complexity_score,
                rationale: telemetry.rationale,
                cache_hit: telemetry.cache_hit,
                upstream_latency_ms: telemetry.upstream_latency_ms,
                fallback_count: telemetry.fallback_count,
                error_code: telemetry.error_code,
            }
            .emit();

            res
        })
    }
}
