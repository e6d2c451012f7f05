//! modelgate: a multi-tenant HTTP gateway for heterogeneous LLM back-ends.
//!
//! Clients submit OpenAI-style chat completions that may reference uploaded
//! files. The gateway ingests and extracts semantic content from those files,
//! scores request complexity, routes to a provider/model under capability and
//! cost constraints, and proxies the response back, buffered or as a live
//! SSE stream, while enforcing rate limits, input sanitization, caching, and
//! load shedding along the way.
//!
//! # Architecture
//!
//! - [router] / [middleware] / [handler] / [responder]: the HTTP substrate,
//!   macro-free routing with `{param}` segments, a composable middleware
//!   chain, and extractor-based handlers.
//! - [ingest]: blob store, MIME sniffing, and the extractor registry
//!   (text, CSV, JSON, PDF, images, audio transcription).
//! - [scoring] and [routing]: pure functions from request features to a
//!   complexity score and a routed model with fallbacks.
//! - [upstream] and [proxy]: pooled provider connections (h2 preferred),
//!   circuit breakers, retry/fallback, and SSE re-framing with end-to-end
//!   cancellation.
//! - [cache], [plugins::rate_limiter], [middleware::security], [metrics],
//!   [health]: the cross-cutting runtime.
//!
//! # Quickstart
//!
//! ```rust,no_run
//! use modelgate::{api, config::GatewayConfig, server::serve};
//! use tokio::net::TcpListener;
//!
//! # async fn example(state: std::sync::Arc<modelgate::api::AppState>) -> anyhow::Result<()> {
//! let router = api::build_router(state);
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

/// HTTP API surface: shared state, route table, handlers.
pub mod api;

/// HTTP response body handling.
pub mod body;

/// Byte buffer wrapper for SSE frames.
pub mod bytes;

/// Two-tier async cache with single-flight.
pub mod cache;

/// Model catalog and routing snapshot.
pub mod catalog;

/// OpenAI-style chat wire types.
pub mod chat;

/// TOML configuration.
pub mod config;

/// Per-request context: identity, deadline, cancellation.
pub mod context;

/// Error taxonomy with stable codes and statuses.
pub mod error;

/// Request data extraction utilities.
pub mod extractors;

/// Request handler traits and implementations.
mod handler;

/// System health snapshot.
pub mod health;

/// Ingestion and content extraction pipeline.
pub mod ingest;

/// Counters, histograms, and request events.
pub mod metrics;

/// Middleware pipeline and the built-in filters.
pub mod middleware;

/// Plugin system and the rate limiter.
pub mod plugins;

/// Streaming proxy: upstream chunks to client SSE frames.
pub mod proxy;

/// Response generation utilities and traits.
pub mod responder;

/// Route definition and matching logic.
mod route;

/// Request routing and dispatch.
pub mod router;

/// Deterministic complexity scoring.
pub mod scoring;

/// Model selection over catalog snapshots.
pub mod routing;

/// HTTP server loop.
pub mod server;

/// TLS server loop.
pub mod server_tls;

/// Server-Sent Events framing.
pub mod sse;

/// Tracing subscriber setup.
pub mod tracing;

/// Core type definitions.
pub mod types;

/// Upstream dispatch: pools, adapters, breakers.
pub mod upstream;

/// Bounded CPU-bound worker pool.
pub mod worker;

pub use ::bytes::Bytes;
pub use http::{Method, StatusCode, header};
pub use server::serve;
pub use server_tls::serve_tls;
