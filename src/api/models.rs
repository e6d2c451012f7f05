//! Model catalog listing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::{
    api::AppState,
    catalog::PricingTier,
    config::TierFilter,
    error::GatewayError,
    extractors::extension::Extension,
    types::Response,
};

/// `GET /api/v1/models`: descriptors visible under the configured tier,
/// memoized for 30 seconds through the cache's single-flight path.
pub async fn list_models(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, GatewayError> {
    let snapshot = state.catalog.snapshot();
    let key = format!(
        "models:{:?}:{}",
        state.config.router.pricing_tier, snapshot.generation
    );

    let body = state
        .cache
        .get_or_compute::<_, _, GatewayError>(&key, Some(Duration::from_secs(30)), || async {
            let tier = state.config.router.pricing_tier;
            let visible: Vec<_> = snapshot
                .models
                .iter()
                .filter(|m| match tier {
                    TierFilter::Auto => true,
                    TierFilter::Standard => m.pricing_tier == PricingTier::Standard,
                    TierFilter::Enterprise => m.pricing_tier == PricingTier::Enterprise,
                    TierFilter::Local => m.pricing_tier == PricingTier::Local,
                })
                .map(|m| {
                    serde_json::json!({
                        "id": m.model_id,
                        "provider": m.provider_id,
                        "capabilities": m.capabilities,
                        "context_window": m.context_window,
                        "max_output_tokens": m.max_output_tokens,
                        "speed_tier": m.speed_tier,
                        "pricing_tier": m.pricing_tier,
                        "cost_per_1k_input": m.cost_per_1k_input,
                        "cost_per_1k_output": m.cost_per_1k_output,
                        "available": snapshot.is_available(m),
                    })
                })
                .collect();

            let listing = serde_json::json!({ "object": "list", "data": visible });
            Ok(Bytes::from(serde_json::to_vec(&listing).map_err(|_| {
                GatewayError::Internal {
                    request_id: String::new(),
                }
            })?))
        })
        .await?;

    let mut res = Response::new(crate::body::GateBody::from(body));
    res.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    Ok(res)
}
