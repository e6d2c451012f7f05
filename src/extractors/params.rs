//! Path parameter extraction from dynamic route segments.
//!
//! The router stores captured `{name}` segments in request extensions as
//! [`PathParams`]; the [`Params`] extractor deserializes them into a typed
//! struct, so `/api/v1/files/{id}` handlers receive `Params<FileId>` with a
//! plain `id: String` field.

use std::{collections::HashMap, future::ready};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{error::GatewayError, extractors::FromRequest, types::Request};

/// Captured path parameters, inserted by the router during dispatch.
#[derive(Clone, Default)]
pub(crate) struct PathParams(pub HashMap<String, String>);

/// Path parameter extractor with deserialization to a typed structure.
pub struct Params<T>(pub T);

impl<'a, T> FromRequest<'a> for Params<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Error = GatewayError;

    fn from_request(
        req: &'a mut Request,
    ) -> impl core::future::Future<Output = Result<Self, Self::Error>> + Send + 'a {
        let params = req
            .extensions()
            .get::<PathParams>()
            .cloned()
            .unwrap_or_default();

        let map: Map<String, Value> = params
            .0
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        ready(
            serde_json::from_value::<T>(Value::Object(map)).map_err(|e| GatewayError::Validation {
                message: format!("invalid path parameters: {e}"),
            })
            .map(Params),
        )
    }
}
