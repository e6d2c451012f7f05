//! HTTP request data extraction utilities and traits.
//!
//! Extractors parse parts of an incoming request (JSON bodies, multipart
//! uploads, path parameters, request-scoped extensions) in a type-safe way.
//! A handler declares what it needs in its signature and the [`FromRequest`]
//! machinery produces it; extraction failures short-circuit with the
//! taxonomy's error responses.
//!
//! # Examples
//!
//! ```rust
//! use modelgate::extractors::FromRequest;
//! use modelgate::types::Request;
//!
//! struct UserAgent(Option<String>);
//!
//! impl<'a> FromRequest<'a> for UserAgent {
//!     type Error = &'static str;
//!
//!     async fn from_request(req: &'a mut Request) -> Result<Self, Self::Error> {
//!         Ok(UserAgent(
//!             req.headers()
//!                 .get("user-agent")
//!                 .and_then(|v| v.to_str().ok())
//!                 .map(str::to_owned),
//!         ))
//!     }
//! }
//! ```

/// Request-scoped extension extraction (context, shared state).
pub mod extension;

/// JSON request body parsing and deserialization.
pub mod json;

/// Multipart form data parsing for file uploads.
pub mod multipart;

/// Path parameter extraction from dynamic route segments.
pub mod params;

/// Trait for extracting data from HTTP requests.
///
/// Extractors that consume the body (JSON, multipart) and extractors that
/// only read metadata (extensions, path parameters) share this interface;
/// extraction is asynchronous to support streaming body processing.
pub trait FromRequest<'a>: Sized {
    /// Error type returned when extraction fails.
    type Error: crate::responder::Responder;

    /// Extracts the type from the HTTP request.
    fn from_request(
        req: &'a mut crate::types::Request,
    ) -> impl core::future::Future<Output = core::result::Result<Self, Self::Error>> + Send + 'a;
}
