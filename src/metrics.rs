//! Counters, histograms, and the per-request structured event.
//!
//! The registry is plain atomics, no exporter dependency, rendered as
//! Prometheus-style text by the metrics endpoint and as JSON fields in the
//! access log. One [`RequestEvent`] is emitted per request by the access-log
//! middleware with the spec'd field set; everything else aggregates here.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

/// Upstream latency histogram bucket bounds in milliseconds.
const LATENCY_BUCKETS_MS: [u64; 8] = [50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

/// Fixed-bucket latency histogram.
#[derive(Default)]
pub struct Histogram {
    buckets: [AtomicU64; 8],
    overflow: AtomicU64,
    count: AtomicU64,
    sum_ms: AtomicU64,
}

impl Histogram {
    pub fn observe(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if ms <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.overflow.fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self, out: &mut String, name: &str, labels: &str) {
        let mut cumulative = 0u64;
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            out.push_str(&format!(
                "{name}_bucket{{{labels}le=\"{bound}\"}} {cumulative}\n"
            ));
        }
        cumulative += self.overflow.load(Ordering::Relaxed);
        out.push_str(&format!("{name}_bucket{{{labels}le=\"+Inf\"}} {cumulative}\n"));
        out.push_str(&format!(
            "{name}_sum{{{labels}}} {}\n",
            self.sum_ms.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "{name}_count{{{labels}}} {}\n",
            self.count.load(Ordering::Relaxed)
        ));
    }
}

/// Process-wide metrics registry.
#[derive(Default)]
pub struct Metrics {
    /// Requests by status class ("2xx", "4xx", …).
    status_classes: DashMap<String, AtomicU64>,
    /// Upstream latency per provider.
    upstream_latency: DashMap<String, Histogram>,
    /// Rate-limit rejections.
    pub rate_limited: AtomicU64,
    /// Requests short-circuited by an open breaker.
    pub breaker_rejections: AtomicU64,
    /// Fallback attempts that were actually used.
    pub fallbacks_used: AtomicU64,
    /// Breaker state per provider/model key (0 closed, 1 open).
    breaker_state: DashMap<String, AtomicU64>,
}

impl Metrics {
    pub fn record_status(&self, status: u16) {
        let class = format!("{}xx", status / 100);
        self.status_classes
            .entry(class)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_upstream(&self, provider: &str, ms: u64) {
        self.upstream_latency
            .entry(provider.to_string())
            .or_default()
            .observe(ms);
    }

    pub fn set_breaker(&self, key: &str, open: bool) {
        self.breaker_state
            .entry(key.to_string())
            .or_default()
            .store(u64::from(open), Ordering::Relaxed);
    }

    /// Prometheus-style text exposition, plus cache stats supplied by the
    /// caller (the cache owns its own counters).
    pub fn render(&self, cache_hit_ratio: f64) -> String {
        let mut out = String::new();

        out.push_str("# TYPE gateway_requests_total counter\n");
        let mut classes: Vec<(String, u64)> = self
            .status_classes
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        classes.sort();
        for (class, count) in classes {
            out.push_str(&format!(
                "gateway_requests_total{{class=\"{class}\"}} {count}\n"
            ));
        }

        out.push_str("# TYPE gateway_upstream_latency_ms histogram\n");
        let mut providers: Vec<String> = self
            .upstream_latency
            .iter()
            .map(|e| e.key().clone())
            .collect();
        providers.sort();
        for provider in providers {
            if let Some(hist) = self.upstream_latency.get(&provider) {
                hist.render(
                    &mut out,
                    "gateway_upstream_latency_ms",
                    &format!("provider=\"{provider}\","),
                );
            }
        }

        out.push_str("# TYPE gateway_cache_hit_ratio gauge\n");
        out.push_str(&format!("gateway_cache_hit_ratio {cache_hit_ratio:.4}\n"));

        out.push_str("# TYPE gateway_rate_limited_total counter\n");
        out.push_str(&format!(
            "gateway_rate_limited_total {}\n",
            self.rate_limited.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE gateway_breaker_rejections_total counter\n");
        out.push_str(&format!(
            "gateway_breaker_rejections_total {}\n",
            self.breaker_rejections.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE gateway_fallbacks_total counter\n");
        out.push_str(&format!(
            "gateway_fallbacks_total {}\n",
            self.fallbacks_used.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE gateway_breaker_open gauge\n");
        let mut keys: Vec<String> = self.breaker_state.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        for key in keys {
            if let Some(state) = self.breaker_state.get(&key) {
                out.push_str(&format!(
                    "gateway_breaker_open{{target=\"{key}\"}} {}\n",
                    state.load(Ordering::Relaxed)
                ));
            }
        }

        out
    }
}

/// One structured event per request, emitted by the access-log middleware.
#[derive(Debug, Default, Serialize)]
pub struct RequestEvent {
    pub request_id: String,
    pub identity: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity_score: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rationale: Vec<String>,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_latency_ms: Option<u64>,
    pub fallback_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl RequestEvent {
    /// Emits the event at INFO with stable field names.
    pub fn emit(&self) {
        tracing::info!(
            request_id = %self.request_id,
            identity = %self.identity,
            method = %self.method,
            path = %self.path,
            status = self.status,
            latency_ms = self.latency_ms,
            bytes_in = self.bytes_in,
            bytes_out = self.bytes_out,
            selected_model = self.selected_model.as_deref(),
            complexity_score = self.complexity_score,
            rationale = ?self.rationale,
            cache_hit = self.cache_hit,
            upstream_latency_ms = self.upstream_latency_ms,
            fallback_count = self.fallback_count,
            error_code = self.error_code.as_deref(),
            "request"
        );
    }
}

/// Per-request routing outcome attached to response extensions so the
/// access-log middleware can fold it into the [`RequestEvent`].
#[derive(Debug, Clone, Default)]
pub struct RouteTelemetry {
    pub selected_model: Option<String>,
    pub complexity_score: Option<u32>,
    pub rationale: Vec<String>,
    pub cache_hit: bool,
    pub upstream_latency_ms: Option<u64>,
    pub fallback_count: u32,
    pub error_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_are_cumulative() {
        let h = Histogram::default();
        h.observe(40);
        h.observe(90);
        h.observe(20_000);

        let mut out = String::new();
        h.render(&mut out, "m", "");
        assert!(out.contains("m_bucket{le=\"50\"} 1"));
        assert!(out.contains("m_bucket{le=\"100\"} 2"));
        assert!(out.contains("m_bucket{le=\"+Inf\"} 3"));
        assert!(out.contains("m_count{} 3"));
    }

    #[test]
    fn render_includes_all_families() {
        let m = Metrics::default();
        m.record_status(200);
        m.record_status(404);
        m.record_status(200);
        m.observe_upstream("openai", 120);
        m.rate_limited.fetch_add(2, Ordering::Relaxed);
        m.set_breaker("openai/gpt-4o", true);

        let out = m.render(0.5);
        assert!(out.contains("gateway_requests_total{class=\"2xx\"} 2"));
        assert!(out.contains("gateway_requests_total{class=\"4xx\"} 1"));
        assert!(out.contains("provider=\"openai\""));
        assert!(out.contains("gateway_cache_hit_ratio 0.5000"));
        assert!(out.contains("gateway_rate_limited_total 2"));
        assert!(out.contains("gateway_breaker_open{target=\"openai/gpt-4o\"} 1"));
    }
}
