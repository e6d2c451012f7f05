//! Response generation utilities and trait implementations.
//!
//! This module provides the core [`Responder`] trait that converts handler
//! return values into HTTP responses. Implementations exist for plain strings,
//! status/body tuples, and the [`Json`] wrapper the API handlers use for every
//! structured payload. Error types across the gateway also implement
//! `Responder`, which is what lets handlers bail out with `?`.
//!
//! # Examples
//!
//! ```rust
//! use modelgate::responder::{Json, Responder};
//! use http::StatusCode;
//! use serde_json::json;
//!
//! let ok = Json(json!({ "status": "healthy" })).into_response();
//! assert_eq!(ok.status(), StatusCode::OK);
//!
//! let created = (StatusCode::CREATED, "stored").into_response();
//! assert_eq!(created.status(), StatusCode::CREATED);
//! ```

use std::{convert::Infallible, fmt::Display};

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode, header};
use http_body_util::Full;
use serde::Serialize;

use crate::body::GateBody;

/// Trait for converting types into HTTP responses.
pub trait Responder {
    /// Converts the implementing type into an HTTP response.
    fn into_response(self) -> Response<GateBody>;
}

impl Responder for Response<GateBody> {
    fn into_response(self) -> Response<GateBody> {
        self
    }
}

impl Responder for &'static str {
    fn into_response(self) -> Response<GateBody> {
        Response::new(GateBody::new(Full::from(Bytes::from_static(
            self.as_bytes(),
        ))))
    }
}

impl Responder for String {
    fn into_response(self) -> Response<GateBody> {
        Response::new(GateBody::new(Full::from(Bytes::from(self))))
    }
}

impl Responder for () {
    fn into_response(self) -> Response<GateBody> {
        Response::new(GateBody::empty())
    }
}

impl Responder for Infallible {
    fn into_response(self) -> Response<GateBody> {
        match self {}
    }
}

impl Responder for StatusCode {
    fn into_response(self) -> Response<GateBody> {
        let mut res = Response::new(GateBody::empty());
        *res.status_mut() = self;
        res
    }
}

/// Converts a status code and displayable body into a plain-text response.
impl<R> Responder for (StatusCode, R)
where
    R: Display,
{
    fn into_response(self) -> Response<GateBody> {
        let (status, body) = self;
        let mut res = Response::new(GateBody::new(Full::from(Bytes::from(body.to_string()))));
        *res.status_mut() = status;
        res
    }
}

impl<T, E> Responder for Result<T, E>
where
    T: Responder,
    E: Responder,
{
    fn into_response(self) -> Response<GateBody> {
        match self {
            Ok(value) => value.into_response(),
            Err(err) => err.into_response(),
        }
    }
}

/// JSON response wrapper with automatic serialization.
///
/// Serializes the inner value with serde_json and sets
/// `content-type: application/json`. Serialization failure degrades to a 500
/// with an opaque body; the gateway's own types always serialize.
///
/// # Examples
///
/// ```rust
/// use modelgate::responder::{Json, Responder};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct ModelList {
///     data: Vec<String>,
/// }
///
/// let res = Json(ModelList { data: vec!["gpt-4o-mini".into()] }).into_response();
/// assert_eq!(
///     res.headers().get("content-type").unwrap(),
///     "application/json"
/// );
/// ```
pub struct Json<T>(pub T);

impl<T: Serialize> Responder for Json<T> {
    fn into_response(self) -> Response<GateBody> {
        match serde_json::to_vec(&self.0) {
            Ok(buf) => {
                let mut res = Response::new(GateBody::from(buf));
                res.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                res
            }
            Err(_) => {
                let mut res = Response::new(GateBody::from("serialization failure"));
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res
            }
        }
    }
}

/// JSON response with an explicit status code.
impl<T: Serialize> Responder for (StatusCode, Json<T>) {
    fn into_response(self) -> Response<GateBody> {
        let (status, json) = self;
        let mut res = json.into_response();
        *res.status_mut() = status;
        res
    }
}
