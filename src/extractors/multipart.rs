//! Multipart form data extraction for file uploads.
//!
//! Wraps a `multipart/form-data` request body in a `multer::Multipart` parser
//! so the upload handler can stream the `file` field through the blob store's
//! cap-aware sink without buffering the whole payload. Boundary or
//! content-type problems surface as `validation-error`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modelgate::extractors::multipart::GateMultipart;
//! use modelgate::extractors::FromRequest;
//! use modelgate::types::Request;
//!
//! async fn handler(mut req: Request) -> Result<(), Box<dyn std::error::Error>> {
//!     let GateMultipart(mut multipart) = GateMultipart::from_request(&mut req).await?;
//!
//!     while let Some(field) = multipart.next_field().await? {
//!         if field.name() == Some("file") {
//!             // stream field.chunk() into the blob store
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use http::header::CONTENT_TYPE;
use http_body_util::BodyExt;
use multer::Multipart;

use crate::{error::GatewayError, extractors::FromRequest, types::Request};

/// Raw multipart extractor exposing the `multer` field stream.
pub struct GateMultipart<'a>(pub Multipart<'a>);

impl<'a> GateMultipart<'a> {
    /// Consumes the wrapper and returns the inner `Multipart` instance.
    #[inline]
    pub fn into_inner(self) -> Multipart<'a> {
        self.0
    }

    fn extract_multipart(req: &'a mut Request) -> Result<GateMultipart<'a>, GatewayError> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .ok_or_else(|| GatewayError::Validation {
                message: "missing content-type header".to_string(),
            })?;

        let content_type_str = content_type.to_str().map_err(|_| GatewayError::Validation {
            message: "content-type header contains invalid UTF-8".to_string(),
        })?;

        let boundary =
            multer::parse_boundary(content_type_str).map_err(|e| GatewayError::Validation {
                message: format!("not multipart/form-data or boundary missing: {e}"),
            })?;

        let body_stream = req.body_mut().into_data_stream();
        Ok(GateMultipart(Multipart::new(body_stream, boundary)))
    }
}

impl<'a> FromRequest<'a> for GateMultipart<'a> {
    type Error = GatewayError;

    fn from_request(
        req: &'a mut Request,
    ) -> impl core::future::Future<Output = core::result::Result<Self, Self::Error>> + Send + 'a
    {
        futures_util::future::ready(Self::extract_multipart(req))
    }
}
