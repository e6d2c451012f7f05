//! Rate limiting plugin: token buckets per (rule, identity).
//!
//! Rules pair a route glob with a bucket shape; the first matching rule
//! applies, and the spec's default rule (100 requests / 60 s per source IP)
//! backstops every path. Refill is continuous: on each request the bucket
//! gains `elapsed x capacity / window` tokens, clamped to capacity, then one
//! token is spent or the request is rejected with `rate-limited`. Decisions
//! within one bucket are linearizable: the dashmap entry guard is the
//! single writer. Every response carries the `X-RateLimit-*` headers, and a
//! background task purges buckets idle for five minutes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use http::HeaderValue;
use tokio::time::{self, Instant};

use crate::{
    config::{RateRuleConfig, RuleIdentity},
    context::{Identity, RequestContext},
    error::GatewayError,
    metrics::Metrics,
    middleware::Next,
    plugins::GatePlugin,
    responder::Responder,
    router::Router,
    types::Request,
};

/// One token bucket.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Outcome of one rate-limit check, also the inspection shape.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
    pub rule_glob: String,
}

/// Matches a route glob against a path.
///
/// `*` as a whole segment matches exactly one segment; a trailing `*` matches
/// the rest of the path. `/*` therefore matches every route.
pub(crate) fn glob_match(pattern: &str, path: &str) -> bool {
    let mut pattern_segments = pattern.trim_matches('/').split('/').peekable();
    let mut path_segments = path.trim_matches('/').split('/');

    loop {
        match pattern_segments.next() {
            None => return path_segments.next().is_none(),
            Some("*") if pattern_segments.peek().is_none() => return true,
            Some("*") => {
                if path_segments.next().is_none() {
                    return false;
                }
            }
            Some(expected) => {
                if path_segments.next() != Some(expected) {
                    return false;
                }
            }
        }
    }
}

/// Rate limiter core: rules plus bucket store.
pub struct RateLimiter {
    rules: Vec<RateRuleConfig>,
    store: DashMap<(usize, String), Bucket>,
}

impl RateLimiter {
    /// Builds the limiter; the default rule is always appended so every
    /// route is covered.
    pub fn new(mut rules: Vec<RateRuleConfig>) -> Self {
        rules.push(RateRuleConfig::default_rule());
        Self {
            rules,
            store: DashMap::new(),
        }
    }

    fn bucket_key(rule: &RateRuleConfig, identity: &Identity, peer: std::net::IpAddr) -> String {
        match rule.identity {
            // IP-keyed rules always bucket on the connection address, even
            // for key-authenticated callers.
            RuleIdentity::Ip => format!("ip:{peer}"),
            // Key-keyed rules fall back to the connection identity when no
            // key was presented.
            RuleIdentity::ApiKey => identity.key(),
        }
    }

    /// Checks and spends one token for `path` under `identity`.
    pub fn check(&self, path: &str, identity: &Identity, peer: std::net::IpAddr) -> Decision {
        let (index, rule) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| glob_match(&rule.route_glob, path))
            // The appended default rule matches everything.
            .unwrap_or((self.rules.len() - 1, self.rules.last().unwrap()));

        let capacity = rule.capacity as f64;
        let rate = capacity / rule.window_seconds as f64;
        let key = (index, Self::bucket_key(rule, identity, peer));

        let now = Instant::now();
        let mut bucket = self.store.entry(key).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.last_refill = now;
        bucket.last_seen = now;

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }

        let reset_secs = if bucket.tokens >= 1.0 {
            0
        } else {
            ((1.0 - bucket.tokens) / rate).ceil() as u64
        };

        Decision {
            allowed,
            limit: rule.capacity,
            remaining: bucket.tokens.floor().max(0.0) as u32,
            reset_secs,
            rule_glob: rule.route_glob.clone(),
        }
    }

    /// Remaining tokens across all rules for one identity; the inspection
    /// endpoint's payload. Does not spend tokens.
    pub fn inspect(&self, identity: &Identity, peer: std::net::IpAddr) -> Vec<Decision> {
        let now = Instant::now();
        self.rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                let capacity = rule.capacity as f64;
                let rate = capacity / rule.window_seconds as f64;
                let key = (index, Self::bucket_key(rule, identity, peer));
                let tokens = self
                    .store
                    .get(&key)
                    .map(|b| {
                        let elapsed = now.duration_since(b.last_refill).as_secs_f64();
                        (b.tokens + elapsed * rate).min(capacity)
                    })
                    .unwrap_or(capacity);
                Decision {
                    allowed: tokens >= 1.0,
                    limit: rule.capacity,
                    remaining: tokens.floor().max(0.0) as u32,
                    reset_secs: if tokens >= 1.0 {
                        0
                    } else {
                        ((1.0 - tokens) / rate).ceil() as u64
                    },
                    rule_glob: rule.route_glob.clone(),
                }
            })
            .collect()
    }

    fn purge_idle(&self, idle_for: Duration) {
        let now = Instant::now();
        self.store
            .retain(|_, bucket| now.duration_since(bucket.last_seen) < idle_for);
    }
}

/// Router plugin wiring the limiter into the middleware chain.
#[derive(Clone)]
pub struct RateLimiterPlugin {
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
}

impl RateLimiterPlugin {
    pub fn new(limiter: Arc<RateLimiter>, metrics: Arc<Metrics>) -> Self {
        Self { limiter, metrics }
    }
}

impl GatePlugin for RateLimiterPlugin {
    fn name(&self) -> &'static str {
        "RateLimiterPlugin"
    }

    fn setup(&self, router: &Router) -> Result<()> {
        let limiter = self.limiter.clone();
        let metrics = self.metrics.clone();

        router.middleware(move |req: Request, next: Next| {
            let limiter = limiter.clone();
            let metrics = metrics.clone();
            async move {
                let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
                    // Context middleware not yet run; fail closed on wiring bugs.
                    return GatewayError::Internal {
                        request_id: String::new(),
                    }
                    .into_response();
                };

                let decision = limiter.check(req.uri().path(), &ctx.identity, ctx.peer);
                let mut res = if decision.allowed {
                    next.run(req).await
                } else {
                    metrics
                        .rate_limited
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    GatewayError::RateLimited {
                        reset_secs: decision.reset_secs,
                    }
                    .into_response()
                };

                let headers = res.headers_mut();
                if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
                    headers.insert("x-ratelimit-limit", v);
                }
                if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
                    headers.insert("x-ratelimit-remaining", v);
                }
                if let Ok(v) = HeaderValue::from_str(&decision.reset_secs.to_string()) {
                    headers.insert("x-ratelimit-reset", v);
                }
                res
            }
        });

        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let mut tick = time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                limiter.purge_idle(Duration::from_secs(300));
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn ip(last: u8) -> Identity {
        Identity::Ip(IpAddr::from([10, 0, 0, last]))
    }

    fn peer(identity: &Identity) -> IpAddr {
        match identity {
            Identity::Ip(ip) => *ip,
            Identity::ApiKey(_) => IpAddr::from([127, 0, 0, 1]),
        }
    }

    fn rules(capacity: u32, window: u64) -> Vec<RateRuleConfig> {
        vec![RateRuleConfig {
            route_glob: "/api/*".to_string(),
            capacity,
            window_seconds: window,
            identity: RuleIdentity::Ip,
        }]
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("/*", "/anything/at/all"));
        assert!(glob_match("/api/v1/upload", "/api/v1/upload"));
        assert!(!glob_match("/api/v1/upload", "/api/v1/files"));
        assert!(glob_match("/api/*", "/api/v1/chat/completions"));
        assert!(glob_match("/api/v1/files/*", "/api/v1/files/abc"));
        assert!(!glob_match("/api/v1/files/*/extract", "/api/v1/files/abc"));
        assert!(glob_match("/api/v1/files/*/extract", "/api/v1/files/abc/extract"));
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_boundary() {
        let limiter = RateLimiter::new(rules(3, 60));
        let id = ip(1);

        for _ in 0..3 {
            assert!(limiter.check("/api/v1/chat/completions", &id, peer(&id)).allowed);
        }
        let rejected = limiter.check("/api/v1/chat/completions", &id, peer(&id));
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.reset_secs >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(rules(2, 10));
        let id = ip(2);

        assert!(limiter.check("/api/x", &id, peer(&id)).allowed);
        assert!(limiter.check("/api/x", &id, peer(&id)).allowed);
        assert!(!limiter.check("/api/x", &id, peer(&id)).allowed);

        // One token refills every 5 seconds at capacity 2 / window 10.
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.check("/api/x", &id, peer(&id)).allowed);
        assert!(!limiter.check("/api/x", &id, peer(&id)).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn identities_have_independent_buckets() {
        let limiter = RateLimiter::new(rules(1, 60));
        assert!(limiter.check("/api/x", &ip(1), peer(&ip(1))).allowed);
        assert!(!limiter.check("/api/x", &ip(1), peer(&ip(1))).allowed);
        assert!(limiter.check("/api/x", &ip(2), peer(&ip(2))).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn unmatched_paths_fall_back_to_default_rule() {
        let limiter = RateLimiter::new(rules(1, 60));
        let decision = limiter.check("/health", &ip(3), peer(&ip(3)));
        assert!(decision.allowed);
        assert_eq!(decision.rule_glob, "/*");
        assert_eq!(decision.limit, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn inspect_does_not_spend() {
        let limiter = RateLimiter::new(rules(5, 60));
        let id = ip(4);
        limiter.check("/api/x", &id, peer(&id));

        let before = limiter.inspect(&id, peer(&id));
        let after = limiter.inspect(&id, peer(&id));
        assert_eq!(before[0].remaining, 4);
        assert_eq!(after[0].remaining, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_idle_buckets() {
        let limiter = RateLimiter::new(rules(5, 60));
        limiter.check("/api/x", &ip(5), peer(&ip(5)));
        assert_eq!(limiter.store.len(), 1);

        tokio::time::advance(Duration::from_secs(400)).await;
        limiter.purge_idle(Duration::from_secs(300));
        assert!(limiter.store.is_empty());
    }
}
