//! HTTP API surface: shared state and route registration.
//!
//! [`AppState`] bundles every long-lived component; a middleware injects it
//! into request extensions so handlers pull it back out with the `Extension`
//! extractor. [`build_router`] assembles the middleware chain in its required
//! order (state, context, access log, security headers, API-key guard, body
//! limits) and registers every route of the public contract. The rate
//! limiter joins the chain last as a plugin during server startup.

use std::sync::Arc;

use http::Method;

use crate::{
    cache::Cache,
    catalog::Catalog,
    config::GatewayConfig,
    context,
    health::Health,
    ingest::IngestPipeline,
    metrics::Metrics,
    middleware::{IntoMiddleware, access_log::access_log, body_limit::BodyLimit, security},
    plugins::rate_limiter::{RateLimiter, RateLimiterPlugin},
    router::Router,
    upstream::Dispatcher,
};

/// Chat completion and complexity-analysis handlers.
pub mod chat;

/// Upload and file lifecycle handlers.
pub mod files;

/// Model catalog listing.
pub mod models;

/// Health, metrics, and rate-limit inspection.
pub mod monitoring;

/// Everything a handler needs, shared once per process.
pub struct AppState {
    pub config: GatewayConfig,
    pub cache: Arc<Cache>,
    pub catalog: Arc<Catalog>,
    pub pipeline: Arc<IngestPipeline>,
    pub dispatcher: Arc<Dispatcher>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
    pub health: Arc<Health>,
}

/// Builds the router with the full middleware chain and route table.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new();

    // State injection must come first; everything downstream reads it.
    let injected = state.clone();
    router.middleware(move |mut req, next| {
        let state = injected.clone();
        async move {
            req.extensions_mut().insert(state);
            next.run(req).await
        }
    });

    let expected_key = state
        .config
        .auth
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .filter(|key| !key.is_empty());

    // The API key becomes the caller identity only when auth is enabled; the
    // guard below then rejects bad keys before any bucket exists for them.
    let identity_header = expected_key
        .as_ref()
        .map(|_| state.config.auth.header.clone());
    router.middleware(context::middleware(
        identity_header,
        state.config.request_timeout(),
    ));

    router.middleware(access_log(state.metrics.clone()));
    router.middleware(security::security_headers());

    router.middleware(security::api_key_guard(
        state.config.auth.header.clone(),
        expected_key,
    ));

    // Uploads get the file cap plus multipart framing overhead; everything
    // else is bounded by the message cap.
    let upload_limit = state.config.max_file_bytes + 64 * 1024;
    let body_limit = state.config.max_message_bytes as u64;
    router.middleware(
        BodyLimit::with_dynamic_limit(move |req: &crate::types::Request| {
            if req.uri().path() == "/api/v1/upload" {
                upload_limit
            } else {
                body_limit
            }
        })
        .into_middleware(),
    );

    router.plugin(RateLimiterPlugin::new(
        state.limiter.clone(),
        state.metrics.clone(),
    ));

    router.route(Method::GET, "/health", monitoring::liveness);
    router.route(Method::GET, "/api/v1/models", models::list_models);

    // The upload route additionally enforces its content-type allow-list
    // before the body is touched.
    let upload_route = router.route(Method::POST, "/api/v1/upload", files::upload);
    upload_route.middleware(|req, next| async move {
        let is_multipart = req
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));
        if is_multipart {
            next.run(req).await
        } else {
            crate::responder::Responder::into_response(crate::error::GatewayError::Validation {
                message: "upload requires multipart/form-data".to_string(),
            })
        }
    });
    router.route(Method::GET, "/api/v1/files", files::list_files);
    router.route(Method::GET, "/api/v1/files/{id}", files::get_file);
    router.route(Method::DELETE, "/api/v1/files/{id}", files::delete_file);
    router.route(
        Method::POST,
        "/api/v1/files/{id}/extract",
        files::force_extract,
    );
    router.route(
        Method::POST,
        "/api/v1/chat/completions",
        chat::chat_completions,
    );
    router.route(
        Method::POST,
        "/api/v1/chat/multimodal",
        chat::chat_multimodal,
    );
    router.route(
        Method::POST,
        "/api/v1/analyze-complexity",
        chat::analyze_complexity,
    );
    router.route(
        Method::GET,
        "/api/v1/monitoring/health",
        monitoring::system_health,
    );
    router.route(
        Method::GET,
        "/api/v1/monitoring/rate-limits",
        monitoring::rate_limits,
    );
    let metrics_path = state.config.observability.metrics_path.clone();
    router.route(Method::GET, &metrics_path, monitoring::metrics_text);

    router
}
