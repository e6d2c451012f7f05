//! Model selection: a pure function from score and preferences to a route.
//!
//! `route()` performs no I/O and reads no clocks. Everything dynamic,
//! availability included, arrives through the
//! [`CatalogSnapshot`], so two invocations with the same inputs yield
//! structurally equal routes. The dispatcher walks the returned fallback list
//! itself; availability bookkeeping happens upstream of this module.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    catalog::{CatalogSnapshot, ModelDescriptor, PricingTier, SpeedTier},
    config::{RouterConfig, TierFilter},
    error::GatewayError,
    scoring::ComplexityScore,
};

/// Resolved routing preferences for one request.
#[derive(Debug, Clone, Serialize)]
pub struct RoutePreferences {
    pub prefer_fast: bool,
    pub prefer_cheap: bool,
    pub max_cost_per_1k_tokens: Option<f64>,
    pub pricing_tier: TierFilterPref,
    pub explicit_model_id: String,
}

/// Serializable mirror of the config tier filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierFilterPref {
    Standard,
    Enterprise,
    Local,
    Auto,
}

impl From<TierFilter> for TierFilterPref {
    fn from(value: TierFilter) -> Self {
        match value {
            TierFilter::Standard => TierFilterPref::Standard,
            TierFilter::Enterprise => TierFilterPref::Enterprise,
            TierFilter::Local => TierFilterPref::Local,
            TierFilter::Auto => TierFilterPref::Auto,
        }
    }
}

impl RoutePreferences {
    /// Combines the configured defaults with the request's model hint; the
    /// hint wins when present and not `auto`.
    pub fn resolve(config: &RouterConfig, model_hint: Option<&str>) -> Self {
        let explicit = match model_hint {
            Some(hint) if !hint.is_empty() && hint != "auto" => hint.to_string(),
            _ => config.explicit_model_id.clone(),
        };
        Self {
            prefer_fast: config.prefer_fast,
            prefer_cheap: config.prefer_cheap,
            max_cost_per_1k_tokens: config.max_cost_per_1k_tokens,
            pricing_tier: config.pricing_tier.into(),
            explicit_model_id: explicit,
        }
    }

    /// Stable fingerprint used to memoize router decisions.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{:?}:{}",
            self.prefer_fast,
            self.prefer_cheap,
            self.max_cost_per_1k_tokens.unwrap_or(-1.0),
            self.pricing_tier,
            self.explicit_model_id
        )
    }
}

/// Selected model plus ordered fallbacks and reason codes.
#[derive(Debug, Clone)]
pub struct Route {
    pub selected: Arc<ModelDescriptor>,
    pub fallbacks: Vec<Arc<ModelDescriptor>>,
    pub reasons: Vec<String>,
}

impl Route {
    /// All targets in dispatch order: selected first, then fallbacks.
    pub fn targets(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        std::iter::once(&self.selected).chain(self.fallbacks.iter())
    }
}

/// Serializable route projection used for memoization and previews.
///
/// Descriptors are referenced by `(provider, model)` key; resolving against a
/// snapshot of the same catalog generation always succeeds.
#[derive(Debug, Clone, serde::Deserialize, Serialize)]
pub struct RouteView {
    pub selected: String,
    pub fallbacks: Vec<String>,
    pub reasons: Vec<String>,
}

impl From<&Route> for RouteView {
    fn from(route: &Route) -> Self {
        Self {
            selected: route.selected.key(),
            fallbacks: route.fallbacks.iter().map(|m| m.key()).collect(),
            reasons: route.reasons.clone(),
        }
    }
}

impl RouteView {
    /// Re-binds the view to live descriptors from a snapshot.
    pub fn resolve(&self, catalog: &CatalogSnapshot) -> Option<Route> {
        let find = |key: &str| {
            catalog
                .models
                .iter()
                .find(|m| m.key() == key)
                .cloned()
        };
        let selected = find(&self.selected)?;
        let mut fallbacks = Vec::with_capacity(self.fallbacks.len());
        for key in &self.fallbacks {
            fallbacks.push(find(key)?);
        }
        Some(Route {
            selected,
            fallbacks,
            reasons: self.reasons.clone(),
        })
    }
}

/// Minimum speed tier a score demands.
fn minimum_tier(score: u32) -> SpeedTier {
    match score {
        0..=30 => SpeedTier::Fast,
        31..=70 => SpeedTier::Balanced,
        _ => SpeedTier::Powerful,
    }
}

fn tier_matches(pref: TierFilterPref, tier: PricingTier) -> bool {
    match pref {
        TierFilterPref::Auto => true,
        TierFilterPref::Standard => tier == PricingTier::Standard,
        TierFilterPref::Enterprise => tier == PricingTier::Enterprise,
        TierFilterPref::Local => tier == PricingTier::Local,
    }
}

/// Deterministic candidate ordering.
///
/// Ascending key: capability excess (specialists before generalists), then
/// bias-adjusted cost, then speed-preference match, then model id as the
/// final tiebreak.
fn sort_candidates(
    candidates: &mut [Arc<ModelDescriptor>],
    score: &ComplexityScore,
    prefs: &RoutePreferences,
) {
    candidates.sort_by(|a, b| {
        let excess =
            |m: &ModelDescriptor| m.capabilities.len() - score.required_capabilities.len();
        let biased_cost = |m: &ModelDescriptor| {
            m.cost_per_1k() * if prefs.prefer_cheap { 0.5 } else { 1.0 }
        };
        let speed_miss = |m: &ModelDescriptor| {
            u8::from(!(prefs.prefer_fast && m.speed_tier == SpeedTier::Fast))
        };

        excess(a)
            .cmp(&excess(b))
            .then_with(|| biased_cost(a).total_cmp(&biased_cost(b)))
            .then_with(|| speed_miss(a).cmp(&speed_miss(b)))
            .then_with(|| a.model_id.cmp(&b.model_id))
            .then_with(|| a.provider_id.cmp(&b.provider_id))
    });
}

/// Chooses a model (and fallbacks) for a scored request.
pub fn route(
    score: &ComplexityScore,
    prefs: &RoutePreferences,
    catalog: &CatalogSnapshot,
) -> Result<Route, GatewayError> {
    let mut reasons = Vec::new();

    // Step 1: explicit model short-circuit.
    if prefs.explicit_model_id != "auto" {
        let explicit = catalog
            .models
            .iter()
            .find(|m| m.model_id == prefs.explicit_model_id);
        match explicit {
            Some(model)
                if model.capabilities.is_superset(&score.required_capabilities)
                    && catalog.is_available(model) =>
            {
                reasons.push("explicit-model".to_string());
                return Ok(Route {
                    selected: model.clone(),
                    fallbacks: Vec::new(),
                    reasons,
                });
            }
            Some(_) => reasons.push("explicit-model-unsuitable".to_string()),
            None => reasons.push("explicit-model-unknown".to_string()),
        }
    }

    // Step 2: capability, cost, tier, and availability filters.
    let mut candidates: Vec<Arc<ModelDescriptor>> = catalog
        .models
        .iter()
        .filter(|m| m.capabilities.is_superset(&score.required_capabilities))
        .filter(|m| {
            prefs
                .max_cost_per_1k_tokens
                .is_none_or(|cap| m.cost_per_1k() <= cap)
        })
        .filter(|m| tier_matches(prefs.pricing_tier, m.pricing_tier))
        .filter(|m| catalog.is_available(m))
        .cloned()
        .collect();

    // Step 3: deterministic ordering.
    sort_candidates(&mut candidates, score, prefs);

    // Step 4: minimum speed tier with one-step relaxation.
    let floor = minimum_tier(score.score);
    let mut tiered: Vec<Arc<ModelDescriptor>> = candidates
        .iter()
        .filter(|m| m.speed_tier >= floor)
        .cloned()
        .collect();
    if tiered.is_empty() && floor > SpeedTier::Fast {
        let relaxed = match floor {
            SpeedTier::Powerful => SpeedTier::Balanced,
            _ => SpeedTier::Fast,
        };
        tiered = candidates
            .iter()
            .filter(|m| m.speed_tier >= relaxed)
            .cloned()
            .collect();
        if !tiered.is_empty() {
            reasons.push("tier-relaxed".to_string());
        }
    }

    // Step 5: selection, fallbacks, sentinel.
    if let Some(selected) = tiered.first().cloned() {
        let fallbacks = tiered.iter().skip(1).take(3).cloned().collect();
        reasons.push(format!("tier-floor:{floor:?}").to_lowercase());
        return Ok(Route {
            selected,
            fallbacks,
            reasons,
        });
    }

    let mut locals: Vec<Arc<ModelDescriptor>> = catalog
        .models
        .iter()
        .filter(|m| m.pricing_tier == PricingTier::Local)
        .cloned()
        .collect();
    locals.sort_by(|a, b| a.model_id.cmp(&b.model_id));
    if let Some(sentinel) = locals.into_iter().next() {
        reasons.push("local-sentinel".to_string());
        reasons.push("capability-relaxed".to_string());
        return Ok(Route {
            selected: sentinel,
            fallbacks: Vec::new(),
            reasons,
        });
    }

    Err(GatewayError::ServerBusy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Capability, CapabilitySet};
    use std::collections::HashSet;

    fn model(
        provider: &str,
        id: &str,
        caps: &[Capability],
        cost: f64,
        speed: SpeedTier,
        pricing: PricingTier,
    ) -> Arc<ModelDescriptor> {
        Arc::new(ModelDescriptor {
            provider_id: provider.to_string(),
            model_id: id.to_string(),
            capabilities: caps.iter().copied().collect(),
            cost_per_1k_input: cost / 2.0,
            cost_per_1k_output: cost / 2.0,
            context_window: 128_000,
            max_output_tokens: 4_096,
            speed_tier: speed,
            pricing_tier: pricing,
        })
    }

    fn snapshot(models: Vec<Arc<ModelDescriptor>>) -> CatalogSnapshot {
        CatalogSnapshot {
            models,
            unavailable: HashSet::new(),
            generation: 1,
        }
    }

    fn text_score(points: u32) -> ComplexityScore {
        ComplexityScore {
            score: points,
            required_capabilities: CapabilitySet::text_only(),
            input_tokens: 100,
            output_tokens_ceiling: 1_024,
            rationale: vec![],
        }
    }

    fn prefs() -> RoutePreferences {
        RoutePreferences {
            prefer_fast: false,
            prefer_cheap: false,
            max_cost_per_1k_tokens: None,
            pricing_tier: TierFilterPref::Auto,
            explicit_model_id: "auto".to_string(),
        }
    }

    #[test]
    fn cheapest_fast_model_wins_for_trivial_requests() {
        let catalog = snapshot(vec![
            model("a", "pricey", &[Capability::Text], 0.01, SpeedTier::Fast, PricingTier::Standard),
            model("a", "cheap", &[Capability::Text], 0.001, SpeedTier::Fast, PricingTier::Standard),
            model(
                "b",
                "general",
                &[Capability::Text, Capability::Vision],
                0.0005,
                SpeedTier::Fast,
                PricingTier::Standard,
            ),
        ]);

        let route = route(&text_score(5), &prefs(), &catalog).unwrap();
        // The generalist is cheaper but carries excess capability; the
        // cheapest specialist wins.
        assert_eq!(route.selected.model_id, "cheap");
    }

    #[test]
    fn route_is_pure() {
        let catalog = snapshot(vec![
            model("a", "m1", &[Capability::Text], 0.002, SpeedTier::Fast, PricingTier::Standard),
            model("a", "m2", &[Capability::Text], 0.001, SpeedTier::Balanced, PricingTier::Standard),
        ]);
        let s = text_score(42);
        let p = prefs();
        let r1 = route(&s, &p, &catalog).unwrap();
        let r2 = route(&s, &p, &catalog).unwrap();
        assert_eq!(r1.selected.model_id, r2.selected.model_id);
        assert_eq!(
            r1.fallbacks.iter().map(|m| &m.model_id).collect::<Vec<_>>(),
            r2.fallbacks.iter().map(|m| &m.model_id).collect::<Vec<_>>()
        );
        assert_eq!(r1.reasons, r2.reasons);
    }

    #[test]
    fn capability_superset_is_honored() {
        let catalog = snapshot(vec![
            model("a", "text-only", &[Capability::Text], 0.0001, SpeedTier::Fast, PricingTier::Standard),
            model(
                "a",
                "vision",
                &[Capability::Text, Capability::Vision],
                0.01,
                SpeedTier::Balanced,
                PricingTier::Standard,
            ),
        ]);

        let mut s = text_score(20);
        s.required_capabilities.insert(Capability::Vision);
        let route = route(&s, &prefs(), &catalog).unwrap();
        assert_eq!(route.selected.model_id, "vision");
        assert!(
            route
                .selected
                .capabilities
                .is_superset(&s.required_capabilities)
        );
    }

    #[test]
    fn high_score_demands_powerful_tier() {
        let catalog = snapshot(vec![
            model("a", "fast", &[Capability::Text], 0.0001, SpeedTier::Fast, PricingTier::Standard),
            model("a", "big", &[Capability::Text], 0.03, SpeedTier::Powerful, PricingTier::Standard),
        ]);
        let route = route(&text_score(85), &prefs(), &catalog).unwrap();
        assert_eq!(route.selected.model_id, "big");
    }

    #[test]
    fn tier_relaxes_one_step_with_tag() {
        let catalog = snapshot(vec![model(
            "a",
            "mid",
            &[Capability::Text],
            0.002,
            SpeedTier::Balanced,
            PricingTier::Standard,
        )]);
        let route = route(&text_score(90), &prefs(), &catalog).unwrap();
        assert_eq!(route.selected.model_id, "mid");
        assert!(route.reasons.iter().any(|r| r == "tier-relaxed"));
    }

    #[test]
    fn explicit_model_short_circuits() {
        let catalog = snapshot(vec![
            model("a", "cheap", &[Capability::Text], 0.0001, SpeedTier::Fast, PricingTier::Standard),
            model("a", "chosen", &[Capability::Text], 0.05, SpeedTier::Powerful, PricingTier::Standard),
        ]);
        let mut p = prefs();
        p.explicit_model_id = "chosen".to_string();
        let route = route(&text_score(3), &p, &catalog).unwrap();
        assert_eq!(route.selected.model_id, "chosen");
        assert!(route.reasons.iter().any(|r| r == "explicit-model"));
    }

    #[test]
    fn unknown_explicit_model_falls_through() {
        let catalog = snapshot(vec![model(
            "a",
            "only",
            &[Capability::Text],
            0.001,
            SpeedTier::Fast,
            PricingTier::Standard,
        )]);
        let mut p = prefs();
        p.explicit_model_id = "ghost".to_string();
        let route = route(&text_score(3), &p, &catalog).unwrap();
        assert_eq!(route.selected.model_id, "only");
        assert!(route.reasons.iter().any(|r| r == "explicit-model-unknown"));
    }

    #[test]
    fn unavailable_models_are_skipped() {
        let mut catalog = snapshot(vec![
            model("a", "m1", &[Capability::Text], 0.0001, SpeedTier::Fast, PricingTier::Standard),
            model("a", "m2", &[Capability::Text], 0.001, SpeedTier::Fast, PricingTier::Standard),
        ]);
        catalog.unavailable.insert("a/m1".to_string());
        let route = route(&text_score(3), &prefs(), &catalog).unwrap();
        assert_eq!(route.selected.model_id, "m2");
    }

    #[test]
    fn local_sentinel_when_all_filtered() {
        let catalog = snapshot(vec![
            model("local", "llama", &[Capability::Text], 0.0, SpeedTier::Fast, PricingTier::Local),
        ]);
        let mut s = text_score(10);
        s.required_capabilities.insert(Capability::Vision);
        let route = route(&s, &prefs(), &catalog).unwrap();
        assert_eq!(route.selected.model_id, "llama");
        assert!(route.reasons.iter().any(|r| r == "capability-relaxed"));
    }

    #[test]
    fn empty_catalog_fails() {
        let err = route(&text_score(10), &prefs(), &snapshot(vec![])).unwrap_err();
        assert_eq!(err.code(), "server-busy");
    }

    #[test]
    fn fallbacks_share_required_capabilities() {
        let caps = [Capability::Text, Capability::Vision];
        let catalog = snapshot(vec![
            model("a", "v1", &caps, 0.001, SpeedTier::Fast, PricingTier::Standard),
            model("a", "v2", &caps, 0.002, SpeedTier::Fast, PricingTier::Standard),
            model("a", "v3", &caps, 0.003, SpeedTier::Fast, PricingTier::Standard),
            model("a", "v4", &caps, 0.004, SpeedTier::Fast, PricingTier::Standard),
            model("a", "v5", &caps, 0.005, SpeedTier::Fast, PricingTier::Standard),
        ]);
        let mut s = text_score(5);
        s.required_capabilities.insert(Capability::Vision);
        let route = route(&s, &prefs(), &catalog).unwrap();
        assert_eq!(route.fallbacks.len(), 3);
        for fb in &route.fallbacks {
            assert!(fb.capabilities.is_superset(&s.required_capabilities));
        }
    }
}
