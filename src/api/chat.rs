//! Chat completion and complexity-analysis handlers.
//!
//! The full request path: validate → resolve referenced files (extraction
//! failures degrade to placeholders) → score → route over a catalog snapshot
//! (memoized by score + preferences + catalog generation) → weave extractions
//! into the prompt → dispatch with fallback → stream or buffer back.
//! `analyze-complexity` runs the same path up to the route and stops before
//! any upstream call, which is what makes its numbers comparable with the
//! completion's logged telemetry.

use std::sync::Arc;

use crate::{
    api::AppState,
    catalog::Capability,
    chat::{ChatRequest, ChatResponse, epoch_secs},
    context::RequestContext,
    error::GatewayError,
    extractors::{extension::Extension, json::Json as JsonBody},
    ingest::ResolvedFile,
    ingest::extract::ExtractionKind,
    metrics::RouteTelemetry,
    proxy::{StreamSession, streaming_response},
    responder::{Json, Responder},
    routing::{Route, RoutePreferences, RouteView, route},
    scoring::{ComplexityScore, FileSignal, score},
    types::Response,
    upstream::{
        DispatchOutcome,
        adapter::{FileContext, ImagePart, weave},
    },
};
use uuid::Uuid;

/// `POST /api/v1/chat/completions`: OpenAI-compatible chat.
pub async fn chat_completions(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    JsonBody(request): JsonBody<ChatRequest>,
) -> Response {
    run_chat(state, ctx, request).await
}

/// `POST /api/v1/chat/multimodal`: chat with woven file extractions.
pub async fn chat_multimodal(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    JsonBody(request): JsonBody<ChatRequest>,
) -> Response {
    run_chat(state, ctx, request).await
}

/// `POST /api/v1/analyze-complexity`: score + route preview, no upstream.
pub async fn analyze_complexity(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    JsonBody(request): JsonBody<ChatRequest>,
) -> Response {
    let mut telemetry = RouteTelemetry::default();
    match prepare(&state, &ctx, &request, &mut telemetry).await {
        Ok(prepared) => {
            let mut res = Json(serde_json::json!({
                "complexity": prepared.score,
                "route": RouteView::from(&prepared.route),
            }))
            .into_response();
            res.extensions_mut().insert(telemetry);
            res
        }
        Err(err) => error_response(err, telemetry),
    }
}

struct Prepared {
    resolved: Vec<ResolvedFile>,
    score: ComplexityScore,
    route: Route,
}

fn error_response(err: GatewayError, mut telemetry: RouteTelemetry) -> Response {
    telemetry.error_code = Some(err.code().to_string());
    let mut res = err.into_response();
    res.extensions_mut().insert(telemetry);
    res
}

/// Validation through routing; shared by analysis and completion.
async fn prepare(
    state: &Arc<AppState>,
    ctx: &RequestContext,
    request: &ChatRequest,
    telemetry: &mut RouteTelemetry,
) -> Result<Prepared, GatewayError> {
    request.validate(state.config.max_message_bytes)?;

    let resolved = state
        .pipeline
        .resolve(&request.file_ids, &ctx.identity.key())
        .await?;

    let snapshot = state.catalog.snapshot();
    let fast_window = snapshot
        .models
        .iter()
        .filter(|m| m.speed_tier == crate::catalog::SpeedTier::Fast)
        .map(|m| m.context_window)
        .min();

    let signals: Vec<FileSignal> = resolved.iter().map(FileSignal::from).collect();
    let complexity = score(request, &signals, fast_window);

    let prefs = RoutePreferences::resolve(&state.config.router, request.model.as_deref());

    // Routing is pure over the snapshot, so decisions memoize safely: the
    // catalog generation is part of the key and availability changes bump it.
    let cache_key = format!(
        "route:{}:{}:{}",
        complexity.fingerprint(),
        prefs.fingerprint(),
        snapshot.generation
    );

    let (chosen, cache_hit) = match state.cache.get_json::<RouteView>(&cache_key).await {
        Some(view) => match view.resolve(&snapshot) {
            Some(route) => (route, true),
            None => (route(&complexity, &prefs, &snapshot)?, false),
        },
        None => {
            let fresh = route(&complexity, &prefs, &snapshot)?;
            state
                .cache
                .put_json(&cache_key, &RouteView::from(&fresh), None);
            (fresh, false)
        }
    };

    telemetry.selected_model = Some(chosen.selected.key());
    telemetry.complexity_score = Some(complexity.score);
    telemetry.cache_hit = cache_hit;
    telemetry.rationale = complexity
        .rationale
        .iter()
        .chain(chosen.reasons.iter())
        .cloned()
        .collect();

    Ok(Prepared {
        resolved,
        score: complexity,
        route: chosen,
    })
}

/// Builds per-file prompt contexts; raw image bytes go only to vision models.
async fn file_contexts(
    state: &Arc<AppState>,
    prepared: &Prepared,
) -> (Vec<FileContext>, u32) {
    let vision = prepared
        .route
        .selected
        .capabilities
        .contains(Capability::Vision);

    let mut contexts = Vec::with_capacity(prepared.resolved.len());
    let mut processed = 0u32;

    for resolved in &prepared.resolved {
        match &resolved.outcome {
            Ok(extraction) => {
                processed += 1;
                if vision && extraction.kind == ExtractionKind::ImageCaption {
                    match state.pipeline.read_bytes(&resolved.record).await {
                        Ok(bytes) => {
                            contexts.push(FileContext::Image(ImagePart::from_bytes(
                                &resolved.record.detected_mime,
                                &bytes,
                            )));
                            continue;
                        }
                        Err(_) => {
                            // Blob unreadable after extraction: fall back to
                            // the caption text.
                        }
                    }
                }
                contexts.push(FileContext::Text {
                    name: resolved.record.sanitized_name.clone(),
                    kind: extraction.kind,
                    text: extraction.text.clone(),
                });
            }
            Err(reason) => {
                contexts.push(FileContext::Placeholder {
                    name: resolved.record.sanitized_name.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }

    (contexts, processed)
}

async fn run_chat(state: Arc<AppState>, ctx: RequestContext, request: ChatRequest) -> Response {
    let mut telemetry = RouteTelemetry::default();

    let prepared = match prepare(&state, &ctx, &request, &mut telemetry).await {
        Ok(prepared) => prepared,
        Err(err) => return error_response(err, telemetry),
    };

    let (contexts, files_processed) = file_contexts(&state, &prepared).await;
    let prompt = weave(&request, contexts);

    let dispatched = state
        .dispatcher
        .dispatch(&prepared.route, &prompt, request.stream, &ctx)
        .await;

    let (outcome, meta) = match dispatched {
        Ok(pair) => pair,
        Err(err) => return error_response(err, telemetry),
    };

    telemetry.selected_model = Some(format!("{}/{}", meta.provider, meta.model));
    telemetry.upstream_latency_ms = Some(meta.upstream_latency_ms);
    telemetry.fallback_count = meta.fallback_count;
    telemetry.rationale.extend(meta.reasons.iter().cloned());

    match outcome {
        DispatchOutcome::Streaming(chunks) => {
            let session = StreamSession::new(&meta.model);
            let mut res = streaming_response(session, chunks, ctx.cancel.clone());
            res.extensions_mut().insert(telemetry);
            res
        }
        DispatchOutcome::Buffered(provider_response) => {
            let mut response = ChatResponse::assistant(
                format!("chatcmpl-{}", Uuid::new_v4().simple()),
                epoch_secs(),
                meta.model.clone(),
                provider_response.content,
            );
            response.usage = provider_response.usage;
            if let Some(reason) = provider_response.finish_reason {
                response.choices[0].finish_reason = Some(reason);
            }
            if !request.file_ids.is_empty() {
                response.files_processed = Some(files_processed);
            }

            let mut res = Json(response).into_response();
            res.extensions_mut().insert(telemetry);
            res
        }
    }
}
