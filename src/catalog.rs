//! Model catalog: capabilities, descriptors, and the routing snapshot.
//!
//! The catalog is the router's only view of the world. Descriptors are
//! immutable during a run and swapped wholesale on configuration reload
//! (arc-swap); availability flags are written by the upstream layer as
//! circuit breakers open and close. `route()` never reads the live catalog;
//! it takes a [`CatalogSnapshot`] so the same inputs always produce the same
//! route.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;

/// One model capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Text,
    Vision,
    AudioUnderstanding,
    LongContext,
    FunctionCalling,
}

impl Capability {
    const ALL: [Capability; 5] = [
        Capability::Text,
        Capability::Vision,
        Capability::AudioUnderstanding,
        Capability::LongContext,
        Capability::FunctionCalling,
    ];

    fn bit(self) -> u8 {
        match self {
            Capability::Text => 1 << 0,
            Capability::Vision => 1 << 1,
            Capability::AudioUnderstanding => 1 << 2,
            Capability::LongContext => 1 << 3,
            Capability::FunctionCalling => 1 << 4,
        }
    }
}

/// Closed set of capabilities as a small bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// The empty set.
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    /// Set containing only `text`.
    pub fn text_only() -> Self {
        CapabilitySet(Capability::Text.bit())
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn is_superset(&self, other: &CapabilitySet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 | other.0)
    }

    /// Number of capabilities present.
    pub fn len(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Members in declaration order, for serialization and rationale tags.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        let mut set = CapabilitySet::EMPTY;
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Latency tier of a model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SpeedTier {
    Fast,
    Balanced,
    Powerful,
}

/// Pricing tier of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingTier {
    Standard,
    Enterprise,
    Local,
}

/// Static capability + cost description of one upstream model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub provider_id: String,
    pub model_id: String,
    pub capabilities: CapabilitySet,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub speed_tier: SpeedTier,
    pub pricing_tier: PricingTier,
}

impl ModelDescriptor {
    /// Stable `(provider, model)` key used for availability and breakers.
    pub fn key(&self) -> String {
        format!("{}/{}", self.provider_id, self.model_id)
    }

    /// Combined per-1K cost the router filters and sorts on.
    pub fn cost_per_1k(&self) -> f64 {
        self.cost_per_1k_input + self.cost_per_1k_output
    }
}

/// Immutable view of the catalog handed to `route()`.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    /// All configured models.
    pub models: Vec<Arc<ModelDescriptor>>,
    /// `(provider, model)` keys currently marked unavailable.
    pub unavailable: HashSet<String>,
    /// Monotonic generation; part of the router memoization key.
    pub generation: u64,
}

impl CatalogSnapshot {
    pub fn is_available(&self, model: &ModelDescriptor) -> bool {
        !self.unavailable.contains(&model.key())
    }
}

/// Live catalog with reloadable descriptors and breaker-driven availability.
pub struct Catalog {
    models: ArcSwap<Vec<Arc<ModelDescriptor>>>,
    unavailable: DashMap<String, ()>,
    generation: AtomicU64,
}

impl Catalog {
    /// Builds the catalog from configuration.
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        let models = cfg
            .providers
            .iter()
            .flat_map(|p| {
                p.models.iter().map(|m| {
                    Arc::new(ModelDescriptor {
                        provider_id: p.id.clone(),
                        model_id: m.id.clone(),
                        capabilities: m.capabilities.iter().copied().collect(),
                        cost_per_1k_input: m.cost_per_1k_input.max(0.0),
                        cost_per_1k_output: m.cost_per_1k_output.max(0.0),
                        context_window: m.context_window,
                        max_output_tokens: m.max_output_tokens,
                        speed_tier: m.speed_tier,
                        pricing_tier: m.pricing_tier,
                    })
                })
            })
            .collect::<Vec<_>>();

        Self {
            models: ArcSwap::from_pointee(models),
            unavailable: DashMap::new(),
            generation: AtomicU64::new(1),
        }
    }

    /// Replaces all descriptors; used only on explicit configuration reload.
    pub fn reload(&self, cfg: &GatewayConfig) {
        let fresh = Catalog::from_config(cfg);
        self.models.store(fresh.models.load_full());
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks a `(provider, model)` key unavailable (breaker opened).
    pub fn mark_unavailable(&self, key: &str) {
        if self.unavailable.insert(key.to_string(), ()).is_none() {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Marks a `(provider, model)` key available again (breaker closed).
    pub fn mark_available(&self, key: &str) {
        if self.unavailable.remove(key).is_some() {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Takes an immutable snapshot for one routing decision.
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            models: self.models.load().as_ref().clone(),
            unavailable: self
                .unavailable
                .iter()
                .map(|e| e.key().clone())
                .collect(),
            generation: self.generation.load(Ordering::SeqCst),
        }
    }
}
