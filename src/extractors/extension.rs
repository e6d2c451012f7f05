//! Request-scoped extension extraction.
//!
//! The server loop and the context middleware attach values to request
//! extensions: the peer `SocketAddr`, the [`RequestContext`]
//! (crate::context::RequestContext), and the shared application state. This
//! extractor pulls any such `Clone` value back out in handler signatures.
//!
//! A missing extension is a wiring bug, not a client error, so it surfaces as
//! an internal error rather than a 4xx.

use std::future::ready;

use crate::{error::GatewayError, extractors::FromRequest, types::Request};

/// Extractor for a request-extension value of type `T`.
pub struct Extension<T>(pub T);

impl<'a, T> FromRequest<'a> for Extension<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Error = GatewayError;

    fn from_request(
        req: &'a mut Request,
    ) -> impl core::future::Future<Output = Result<Self, Self::Error>> + Send + 'a {
        ready(
            req.extensions()
                .get::<T>()
                .cloned()
                .map(Extension)
                .ok_or_else(|| GatewayError::Internal {
                    request_id: String::new(),
                }),
        )
    }
}

