//! Core type definitions and aliases used throughout the gateway.
//!
//! This module provides the fundamental type aliases that standardize the types
//! used across the gateway for requests, responses, errors, and middleware.
//! Handlers receive a [`Request`] with a streaming `Incoming` body and produce a
//! [`Response`] backed by [`GateBody`](crate::body::GateBody), which can carry
//! buffered JSON as well as live SSE frames from an upstream provider.
//!
//! # Examples
//!
//! ```rust
//! use modelgate::types::{Request, Response};
//! use modelgate::body::GateBody;
//!
//! async fn handler(_req: Request) -> Response {
//!     Response::new(GateBody::from("{\"ok\":true}"))
//! }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;

use crate::{body::GateBody, middleware::Next};

/// HTTP request type with streaming body support.
///
/// Inbound requests keep Hyper's `Incoming` body so large uploads can be read
/// in bounded chunks instead of being buffered up front.
pub type Request = hyper::Request<Incoming>;

/// HTTP response type backed by the gateway's boxed body.
pub type Response = hyper::Response<GateBody>;

/// Boxed HTTP body type for internal response handling.
pub(crate) type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

/// Boxed error type for thread-safe error handling.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed middleware function type for dynamic middleware composition.
///
/// Middleware functions take a request and the next element in the chain and
/// return a future resolving to a response. The security filter, the rate
/// limiter, and the access log are all expressed in this shape.
pub type BoxMiddleware = Arc<dyn Fn(Request, Next) -> BoxFuture<'static, Response> + Send + Sync>;
