//! JSON request body extraction and deserialization.
//!
//! Parses JSON request bodies into strongly-typed structures using serde.
//! Content-Type is validated against `application/json` (including `+json`
//! suffixes); malformed bodies surface as the taxonomy's `validation-error`.
//! Unknown fields are ignored by the target types to preserve OpenAI wire
//! compatibility.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modelgate::extractors::json::Json;
//! use modelgate::extractors::FromRequest;
//! use modelgate::types::Request;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct ChatMessage {
//!     role: String,
//!     content: String,
//! }
//!
//! async fn handler(mut req: Request) -> Result<String, Box<dyn std::error::Error>> {
//!     let Json(msg): Json<ChatMessage> = Json::from_request(&mut req).await?;
//!     Ok(format!("{}: {}", msg.role, msg.content))
//! }
//! ```

use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

use crate::{error::GatewayError, extractors::FromRequest, types::Request};

/// JSON request body extractor with automatic deserialization.
pub struct Json<T>(pub T);

/// Checks if the Content-Type header indicates JSON content.
///
/// Accepts `application/json` and `application/*+json` variants.
fn is_json_content_type(headers: &http::HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .map(|mime| {
            mime.type_() == "application"
                && (mime.subtype() == "json" || mime.suffix().is_some_and(|s| s == "json"))
        })
        .unwrap_or(false)
}

impl<'a, T> FromRequest<'a> for Json<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Error = GatewayError;

    async fn from_request(req: &'a mut Request) -> Result<Self, Self::Error> {
        if !is_json_content_type(req.headers()) {
            return Err(GatewayError::Validation {
                message: "expected content-type application/json".to_string(),
            });
        }

        let body = req
            .body_mut()
            .collect()
            .await
            .map_err(|e| GatewayError::Validation {
                message: format!("failed to read request body: {e}"),
            })?
            .to_bytes();

        let value = serde_json::from_slice::<T>(&body).map_err(|e| GatewayError::Validation {
            message: format!("malformed JSON body: {e}"),
        })?;

        Ok(Json(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_content_types_are_recognized() {
        let mut headers = http::HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        assert!(is_json_content_type(&headers));

        headers.insert(
            "content-type",
            "application/json; charset=utf-8".parse().unwrap(),
        );
        assert!(is_json_content_type(&headers));

        headers.insert("content-type", "application/hal+json".parse().unwrap());
        assert!(is_json_content_type(&headers));

        headers.insert("content-type", "text/plain".parse().unwrap());
        assert!(!is_json_content_type(&headers));
    }
}
