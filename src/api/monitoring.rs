//! Health, metrics, and rate-limit inspection handlers.

use std::sync::Arc;

use http::HeaderValue;

use crate::{
    api::AppState,
    context::RequestContext,
    extractors::extension::Extension,
    responder::{Json, Responder},
    types::Response,
};

/// `GET /health`: liveness; unauthenticated and cheap.
pub async fn liveness() -> impl Responder {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "modelgate",
    }))
}

/// `GET /api/v1/monitoring/health`: full system snapshot.
pub async fn system_health(Extension(state): Extension<Arc<AppState>>) -> impl Responder {
    Json(state.health.snapshot())
}

/// `GET /api/v1/monitoring/rate-limits`: remaining tokens for the caller.
pub async fn rate_limits(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> impl Responder {
    let buckets = state.limiter.inspect(&ctx.identity, ctx.peer);
    Json(serde_json::json!({
        "identity": ctx.identity.key(),
        "buckets": buckets,
    }))
}

/// `GET /api/v1/performance/metrics`: Prometheus-style text exposition.
pub async fn metrics_text(Extension(state): Extension<Arc<AppState>>) -> Response {
    let body = state.metrics.render(state.cache.stats.hit_ratio());
    let mut res = Response::new(crate::body::GateBody::from(body));
    res.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    res
}
