//! Two-tier async cache with TTL, byte budget, and single-flight.
//!
//! The local tier is a sharded LRU with a byte budget and per-entry TTL; the
//! optional remote tier is any KV behind the [`RemoteTier`] trait. Reads check
//! local first, then remote (populating local on the way back); writes go to
//! both, remote best-effort and non-blocking. A remote outage degrades to
//! local-only with a counter, never an error.
//!
//! [`Cache::get_or_compute`] provides single-flight semantics: N concurrent
//! callers for the same missing key share one producer invocation.
//!
//! The gateway memoizes extractions (keyed by content hash + extractor
//! version), router decisions, and the models listing here. Generation output
//! is never cached.

use std::{
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use tokio::{sync::OnceCell, time::Instant};

/// Number of local-tier shards; keys spread by hash to bound lock contention.
const SHARDS: usize = 16;

/// Remote KV tier contract.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()>;
}

/// One cached value with its expiry.
struct CacheEntry {
    bytes: Bytes,
    expires_at: Instant,
}

struct Shard {
    lru: LruCache<String, CacheEntry>,
    bytes: u64,
}

/// Cache hit/miss accounting exposed through the metrics endpoint.
///
/// `remote_errors` is shared behind an `Arc` so fire-and-forget remote writes
/// can keep counting after `put` has returned.
#[derive(Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub remote_errors: Arc<AtomicU64>,
}

impl CacheStats {
    /// Hit ratio in [0, 1]; zero before any traffic.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}

/// Two-tier cache.
pub struct Cache {
    shards: Vec<Mutex<Shard>>,
    shard_budget: u64,
    default_ttl: Duration,
    remote: Option<Arc<dyn RemoteTier>>,
    flights: DashMap<String, Arc<OnceCell<Bytes>>>,
    pub stats: CacheStats,
}

impl Cache {
    /// `local_bytes` total budget across shards; `default_ttl` applies when a
    /// put does not specify one.
    pub fn new(local_bytes: u64, default_ttl: Duration, remote: Option<Arc<dyn RemoteTier>>) -> Self {
        let shards = (0..SHARDS)
            .map(|_| {
                Mutex::new(Shard {
                    lru: LruCache::unbounded(),
                    bytes: 0,
                })
            })
            .collect();
        Self {
            shards,
            shard_budget: (local_bytes / SHARDS as u64).max(1),
            default_ttl,
            remote,
            flights: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<Shard> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    /// Local-tier lookup; expired entries are evicted on sight.
    pub fn get_local(&self, key: &str) -> Option<Bytes> {
        let mut shard = self.shard(key).lock();
        let expired = match shard.lru.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.bytes.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired
            && let Some(entry) = shard.lru.pop(key)
        {
            shard.bytes -= entry.bytes.len() as u64;
        }
        None
    }

    /// Local-tier insert with strict-LRU byte-budget eviction.
    pub fn put_local(&self, key: &str, bytes: Bytes, ttl: Duration) {
        let size = bytes.len() as u64;
        if size > self.shard_budget {
            // Larger than the whole shard budget: caching it would only evict
            // everything else and then itself.
            return;
        }

        let mut shard = self.shard(key).lock();
        if let Some(old) = shard.lru.put(
            key.to_string(),
            CacheEntry {
                bytes,
                expires_at: Instant::now() + ttl,
            },
        ) {
            shard.bytes -= old.bytes.len() as u64;
        }
        shard.bytes += size;

        while shard.bytes > self.shard_budget {
            match shard.lru.pop_lru() {
                Some((_, evicted)) => shard.bytes -= evicted.bytes.len() as u64,
                None => break,
            }
        }
    }

    /// Two-tier read: local, then remote with local population.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(hit) = self.get_local(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Some(hit);
        }

        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(Some(value)) => {
                    let bytes = Bytes::from(value);
                    self.put_local(key, bytes.clone(), self.default_ttl);
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(bytes);
                }
                Ok(None) => {}
                Err(err) => {
                    self.stats.remote_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%err, "remote cache read failed, degrading to local");
                }
            }
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Two-tier write; the remote write is fire-and-forget.
    pub fn put(&self, key: &str, bytes: Bytes, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.put_local(key, bytes.clone(), ttl);

        if let Some(remote) = &self.remote {
            let remote = remote.clone();
            let key = key.to_string();
            let errors = self.stats.remote_errors.clone();
            tokio::spawn(async move {
                if let Err(err) = remote.put(&key, &bytes, ttl).await {
                    errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%err, "remote cache write failed, degrading to local");
                }
            });
        }
    }

    /// Single-flight read-through: concurrent callers for the same missing
    /// key share one `compute` invocation; late arrivers get the shared value.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Bytes, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let cell = self
            .flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                if let Some(hit) = self.get(key).await {
                    return Ok(hit);
                }
                let value = compute().await?;
                self.put(key, value.clone(), ttl);
                Ok(value)
            })
            .await
            .cloned();

        self.flights.remove(key);
        result
    }

    /// Typed read helper.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Typed write helper.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        if let Ok(buf) = serde_json::to_vec(value) {
            self.put(key, Bytes::from(buf), ttl);
        }
    }
}
