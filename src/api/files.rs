//! Upload and file lifecycle handlers.

use std::sync::Arc;

use crate::{
    api::AppState,
    context::RequestContext,
    error::GatewayError,
    extractors::{FromRequest, extension::Extension, multipart::GateMultipart, params::Params},
    responder::{Json, Responder},
    types::{Request, Response},
};

#[derive(serde::Deserialize)]
pub(crate) struct FileId {
    id: String,
}

/// `POST /api/v1/upload`: multipart upload, field `file`.
pub async fn upload(mut req: Request) -> Response {
    let (state, ctx) = match state_and_ctx(&req) {
        Ok(pair) => pair,
        Err(err) => return err.into_response(),
    };

    let multipart = match GateMultipart::from_request(&mut req).await {
        Ok(m) => m,
        Err(err) => return err.into_response(),
    };

    match upload_inner(state, ctx, multipart).await {
        Ok(res) => res,
        Err(err) => err.into_response(),
    }
}

fn state_and_ctx(req: &Request) -> Result<(Arc<AppState>, RequestContext), GatewayError> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| GatewayError::Internal {
            request_id: String::new(),
        })?;
    let ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .ok_or_else(|| GatewayError::Internal {
            request_id: String::new(),
        })?;
    Ok((state, ctx))
}

async fn upload_inner(
    state: Arc<AppState>,
    ctx: RequestContext,
    multipart: GateMultipart<'_>,
) -> Result<Response, GatewayError> {
    let mut multipart = multipart.into_inner();

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| GatewayError::Validation {
                message: format!("malformed multipart body: {e}"),
            })?;
        let Some(field) = field else {
            return Err(GatewayError::Validation {
                message: "multipart body has no `file` field".to_string(),
            });
        };
        if field.name() != Some("file") {
            continue;
        }

        let declared_name = field.file_name().unwrap_or("upload").to_string();
        // Part content-type first, filename extension second; the sniffer has
        // the final word either way.
        let declared_mime = field
            .content_type()
            .map(|m| m.to_string())
            .unwrap_or_else(|| {
                mime_guess::from_path(&declared_name)
                    .first_or_octet_stream()
                    .to_string()
            });

        let record = state
            .pipeline
            .upload(&ctx.identity.key(), &declared_name, &declared_mime, field)
            .await?;

        if state.config.extraction.eager {
            let pipeline = state.pipeline.clone();
            let id = record.id.clone();
            let identity = ctx.identity.key();
            tokio::spawn(async move {
                if let Err(err) = pipeline.extract(&id, &identity).await {
                    tracing::info!(file = %id, %err, "eager extraction failed");
                }
            });
        }

        return Ok(Json(record).into_response());
    }
}

/// `GET /api/v1/files`: records owned by the caller.
pub async fn list_files(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> impl Responder {
    let files = state.pipeline.records_for(&ctx.identity.key());
    Json(serde_json::json!({ "object": "list", "data": files }))
}

/// `GET /api/v1/files/{id}`: metadata plus extraction status.
pub async fn get_file(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Params(FileId { id }): Params<FileId>,
) -> Result<Response, GatewayError> {
    let record = state.pipeline.record(&id, &ctx.identity.key())?;
    let lookup = state.pipeline.get_extraction(&id, &ctx.identity.key());
    Ok(Json(serde_json::json!({
        "file": record,
        "extraction": lookup,
    }))
    .into_response())
}

/// `DELETE /api/v1/files/{id}`: explicit eviction.
pub async fn delete_file(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Params(FileId { id }): Params<FileId>,
) -> Result<Response, GatewayError> {
    state.pipeline.delete(&id, &ctx.identity.key()).await?;
    Ok(Json(serde_json::json!({ "id": id, "deleted": true })).into_response())
}

/// `POST /api/v1/files/{id}/extract`: force extraction; idempotent.
pub async fn force_extract(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Params(FileId { id }): Params<FileId>,
) -> Result<Response, GatewayError> {
    let extraction = state.pipeline.extract(&id, &ctx.identity.key()).await?;
    Ok(Json(extraction).into_response())
}
