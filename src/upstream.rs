//! Upstream dispatch: provider endpoints, fallback, and streaming.
//!
//! The dispatcher walks a route's targets in order. Per target it checks the
//! circuit breaker, serializes the prompt through the provider's adapter, and
//! sends over the provider's connection pool. Failures in the retryable class
//! (connection errors, 502/503/504, pre-status-line timeouts, open breakers)
//! move on to the next target with exponential backoff, but only while
//! nothing has been delivered toward the client. Breaker transitions write
//! availability flags back into the catalog, which is how the router learns
//! a provider is down without ever doing I/O itself.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use http_body_util::BodyExt;
use rand::Rng;
use tokio::{
    sync::mpsc,
    time::{Instant, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::{Catalog, ModelDescriptor},
    config::GatewayConfig,
    context::RequestContext,
    error::GatewayError,
    ingest::extractors::audio::{TranscriptResponse, TranscriptionClient},
    ingest::extract::ExtractError,
    metrics::Metrics,
    routing::Route,
    upstream::{
        adapter::{ProviderAdapter, ProviderResponse, PromptRequest, adapter_for},
        breaker::{BreakerState, CircuitBreaker, Transition},
        chunk::{SseDecoder, SseEvent, UpstreamChunk},
        pool::{PooledResponse, ProviderPool, UpstreamFailure},
    },
};

pub mod adapter;
pub mod breaker;
pub mod chunk;
pub mod pool;

/// Base delay for the inter-attempt backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(250);
/// Selected target plus at most two fallback attempts.
const MAX_ATTEMPTS: usize = 3;

/// One configured provider: pool, adapter, credentials.
pub struct ProviderEndpoint {
    pub id: String,
    pub pool: Arc<ProviderPool>,
    pub adapter: Box<dyn ProviderAdapter>,
    pub api_key: Option<String>,
}

/// Result of one dispatch, buffered or streaming.
pub enum DispatchOutcome {
    Buffered(ProviderResponse),
    /// Finite chunk sequence; the channel closes after a terminal chunk.
    Streaming(mpsc::Receiver<UpstreamChunk>),
}

/// Telemetry describing how the dispatch went.
#[derive(Debug, Clone)]
pub struct DispatchMeta {
    pub provider: String,
    pub model: String,
    pub fallback_count: u32,
    pub upstream_latency_ms: u64,
    pub reasons: Vec<String>,
}

/// Upstream dispatcher.
pub struct Dispatcher {
    endpoints: HashMap<String, Arc<ProviderEndpoint>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    catalog: Arc<Catalog>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    /// Builds endpoints from configuration; provider API keys resolve from
    /// the environment at startup and never appear in the config file.
    pub fn from_config(
        cfg: &GatewayConfig,
        catalog: Arc<Catalog>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let mut endpoints = HashMap::new();
        for provider in &cfg.providers {
            let api_key = provider
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|key| !key.is_empty());
            if provider.api_key_env.is_some() && api_key.is_none() {
                tracing::warn!(provider = %provider.id, "api key env var unset; requests will be anonymous");
            }

            endpoints.insert(
                provider.id.clone(),
                Arc::new(ProviderEndpoint {
                    id: provider.id.clone(),
                    pool: Arc::new(ProviderPool::new(&provider.base_url, provider.pool.clone())?),
                    adapter: adapter_for(provider.adapter),
                    api_key,
                }),
            );
        }

        Ok(Self {
            endpoints,
            breakers: DashMap::new(),
            catalog,
            metrics,
        })
    }

    /// Host/port pairs for the background reachability prober.
    pub fn probe_targets(&self) -> Vec<(String, String, u16)> {
        self.endpoints
            .values()
            .map(|e| (e.id.clone(), e.pool.host().to_string(), e.pool.port()))
            .collect()
    }

    fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new()))
            .clone()
    }

    fn apply_transition(&self, key: &str, transition: Transition) {
        apply_transition(&self.catalog, &self.metrics, key, transition);
    }

    fn record_outcome(&self, key: &str, breaker: &CircuitBreaker, ok: bool) {
        if let Some(transition) = breaker.record(ok) {
            self.apply_transition(key, transition);
        }
    }

    /// Dispatches a routed request, walking fallbacks on retryable failures.
    pub async fn dispatch(
        &self,
        route: &Route,
        prompt: &PromptRequest,
        stream: bool,
        ctx: &RequestContext,
    ) -> Result<(DispatchOutcome, DispatchMeta), GatewayError> {
        let mut last_failure: Option<(String, UpstreamFailure)> = None;
        let mut reasons = Vec::new();
        let mut attempt = 0usize;

        for model in route.targets().take(MAX_ATTEMPTS) {
            let Some(endpoint) = self.endpoints.get(&model.provider_id) else {
                reasons.push(format!("no-endpoint:{}", model.provider_id));
                continue;
            };

            let key = model.key();
            let breaker = self.breaker(&key);
            let (state, transition) = breaker.check();
            if let Some(t) = transition {
                self.apply_transition(&key, t);
            }
            if state == BreakerState::Open {
                self.metrics
                    .breaker_rejections
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                reasons.push(format!("breaker-open:{key}"));
                last_failure = Some((model.provider_id.clone(), UpstreamFailure::BreakerOpen));
                continue;
            }

            if attempt > 0 {
                if let Some((_, failure)) = &last_failure {
                    reasons.push(format!("primary-{}", failure_tag(failure)));
                }
                let backoff = backoff_delay(attempt - 1).min(ctx.remaining());
                tokio::time::sleep(backoff).await;
                self.metrics
                    .fallbacks_used
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            attempt += 1;

            if ctx.remaining().is_zero() {
                return Err(GatewayError::UpstreamTimeout {
                    provider: model.provider_id.clone(),
                });
            }

            match self
                .attempt(endpoint, model, prompt, stream, ctx, &breaker, &key)
                .await
            {
                Ok((outcome, latency_ms)) => {
                    let meta = DispatchMeta {
                        provider: model.provider_id.clone(),
                        model: model.model_id.clone(),
                        fallback_count: (attempt - 1) as u32,
                        upstream_latency_ms: latency_ms,
                        reasons,
                    };
                    return Ok((outcome, meta));
                }
                Err(failure) => {
                    tracing::warn!(
                        target = %key,
                        attempt,
                        %failure,
                        "upstream attempt failed"
                    );
                    let retryable = failure.retryable();
                    last_failure = Some((model.provider_id.clone(), failure));
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let (provider, failure) = last_failure.unwrap_or_else(|| {
            (
                "none".to_string(),
                UpstreamFailure::Io("no dispatchable target".to_string()),
            )
        });
        Err(map_failure(provider, failure))
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        endpoint: &Arc<ProviderEndpoint>,
        model: &Arc<ModelDescriptor>,
        prompt: &PromptRequest,
        stream: bool,
        ctx: &RequestContext,
        breaker: &Arc<CircuitBreaker>,
        key: &str,
    ) -> Result<(DispatchOutcome, u64), UpstreamFailure> {
        let adapted = endpoint
            .adapter
            .serialize(prompt, model, stream, endpoint.api_key.as_deref())
            .map_err(|e| UpstreamFailure::Io(e.to_string()))?;

        let started = Instant::now();
        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(UpstreamFailure::Cancelled),
            response = endpoint.pool.post(&adapted.path, &adapted.headers, adapted.body) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(failure) => {
                if failure.counts_as_breaker_failure() {
                    self.record_outcome(key, breaker, false);
                }
                return Err(failure);
            }
        };

        let header_latency = started.elapsed().as_millis() as u64;

        if !response.status.is_success() {
            let status = response.status.as_u16();
            let failure = UpstreamFailure::Status(status);
            if failure.counts_as_breaker_failure() {
                self.record_outcome(key, breaker, false);
            } else {
                self.record_outcome(key, breaker, true);
            }
            // Drain a bounded slice of the error body for the log.
            if let Ok(Ok(collected)) =
                timeout(Duration::from_secs(2), response.body.collect()).await
            {
                let body = collected.to_bytes();
                let message = endpoint.adapter.error_message(&body);
                tracing::warn!(target = %key, status, %message, "upstream error response");
            }
            return Err(failure);
        }

        self.metrics
            .observe_upstream(&endpoint.id, header_latency);

        if stream {
            let rx = spawn_pump(PumpParams {
                endpoint: endpoint.clone(),
                response,
                cancel: ctx.cancel.clone(),
                first_byte: endpoint.pool.first_byte_timeout(),
                full: ctx.remaining().min(endpoint.pool.response_timeout()),
                breaker: breaker.clone(),
                catalog: self.catalog.clone(),
                metrics: self.metrics.clone(),
                key: key.to_string(),
            });
            self.record_outcome(key, breaker, true);
            Ok((DispatchOutcome::Streaming(rx), header_latency))
        } else {
            let limit = ctx.remaining().min(endpoint.pool.response_timeout());
            let body = read_buffered(response, limit).await?;
            let parsed = endpoint
                .adapter
                .parse_response(&body)
                .map_err(|e| UpstreamFailure::Io(e.to_string()))?;
            self.record_outcome(key, breaker, true);
            let total_latency = started.elapsed().as_millis() as u64;
            Ok((DispatchOutcome::Buffered(parsed), total_latency))
        }
    }
}

/// Reads a buffered response body under the full-response deadline.
async fn read_buffered(
    response: PooledResponse,
    limit: Duration,
) -> Result<Vec<u8>, UpstreamFailure> {
    let collected = timeout(limit, response.body.collect())
        .await
        .map_err(|_| UpstreamFailure::ResponseTimeout)?
        .map_err(|e| UpstreamFailure::Io(e.to_string()))?;
    Ok(collected.to_bytes().to_vec())
}

/// Everything the stream pump needs to outlive its dispatch call.
struct PumpParams {
    endpoint: Arc<ProviderEndpoint>,
    response: PooledResponse,
    cancel: CancellationToken,
    first_byte: Duration,
    full: Duration,
    breaker: Arc<CircuitBreaker>,
    catalog: Arc<Catalog>,
    metrics: Arc<Metrics>,
    key: String,
}

/// Pumps upstream body frames through the SSE decoder and the adapter into a
/// bounded channel. The channel capacity of one is the backpressure contract:
/// the proxy takes a chunk, flushes it to the client, and only then is the
/// next upstream read scheduled.
fn spawn_pump(params: PumpParams) -> mpsc::Receiver<UpstreamChunk> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        // The pooled permit inside the response stays held for the lifetime
        // of the pump; dropping it early would let the pool over-admit.
        let PumpParams {
            endpoint,
            mut response,
            cancel,
            first_byte,
            full,
            breaker,
            catalog,
            metrics,
            key,
        } = params;
        // Mid-stream outcomes must still drive availability flags.
        let record = |ok: bool| {
            if let Some(transition) = breaker.record(ok) {
                apply_transition(&catalog, &metrics, &key, transition);
            }
        };
        let mut decoder = SseDecoder::new();
        let deadline = Instant::now() + full;
        let mut next_timeout = first_byte;
        let mut clean = false;

        'read: loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    // Client went away; stop consuming upstream bytes. The
                    // pooled permit and connection release as `body` drops.
                    break 'read;
                }
                frame = timeout(next_timeout, response.body.frame()) => frame,
            };

            let frame = match frame {
                Err(_) => {
                    let _ = tx
                        .send(UpstreamChunk::Error {
                            code: "upstream-timeout".to_string(),
                            message: "stream stalled".to_string(),
                        })
                        .await;
                    record(false);
                    return;
                }
                Ok(None) => break 'read,
                Ok(Some(Err(err))) => {
                    let _ = tx
                        .send(UpstreamChunk::Error {
                            code: "upstream-error".to_string(),
                            message: err.to_string(),
                        })
                        .await;
                    record(false);
                    return;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            next_timeout = deadline.saturating_duration_since(Instant::now());
            if next_timeout.is_zero() {
                let _ = tx
                    .send(UpstreamChunk::Error {
                        code: "upstream-timeout".to_string(),
                        message: "response deadline exceeded".to_string(),
                    })
                    .await;
                record(false);
                return;
            }

            let Some(data) = frame.data_ref() else {
                continue;
            };

            for event in decoder.push(data) {
                let SseEvent::Data(payload) = event else {
                    continue;
                };
                for chunk in endpoint.adapter.parse_chunk(&payload) {
                    if matches!(chunk, UpstreamChunk::Keepalive) {
                        continue;
                    }
                    let terminal = chunk.is_terminal();
                    let failed = matches!(chunk, UpstreamChunk::Error { .. });
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                    if terminal {
                        record(!failed);
                        clean = true;
                        break 'read;
                    }
                }
            }
        }

        if !clean && !cancel.is_cancelled() {
            // Stream ended without a terminal chunk; synthesize one so the
            // proxy always closes the client stream properly.
            let _ = tx.send(UpstreamChunk::Finish(None)).await;
            record(true);
        }
    });

    rx
}

/// Syncs a breaker transition into the catalog's availability flags and the
/// metrics gauge; shared between the dispatcher and the stream pump.
fn apply_transition(catalog: &Catalog, metrics: &Metrics, key: &str, transition: Transition) {
    match transition {
        Transition::Opened => {
            tracing::warn!(target = %key, "circuit breaker opened");
            catalog.mark_unavailable(key);
            metrics.set_breaker(key, true);
        }
        Transition::Closed => {
            tracing::info!(target = %key, "circuit breaker closed");
            catalog.mark_available(key);
            metrics.set_breaker(key, false);
        }
    }
}

fn backoff_delay(prior_attempts: usize) -> Duration {
    let base = BACKOFF_BASE * 2u32.pow(prior_attempts.min(4) as u32);
    let jitter = rand::thread_rng().gen_range(0.7..=1.3);
    base.mul_f64(jitter)
}

fn failure_tag(failure: &UpstreamFailure) -> String {
    match failure {
        UpstreamFailure::Status(code) => code.to_string(),
        UpstreamFailure::Connect(_) => "connect".to_string(),
        UpstreamFailure::Tls(_) => "tls".to_string(),
        UpstreamFailure::HeaderTimeout | UpstreamFailure::ResponseTimeout => {
            "timeout".to_string()
        }
        UpstreamFailure::BreakerOpen => "breaker-open".to_string(),
        UpstreamFailure::Io(_) => "io".to_string(),
        UpstreamFailure::Cancelled => "cancelled".to_string(),
    }
}

fn map_failure(provider: String, failure: UpstreamFailure) -> GatewayError {
    match failure {
        UpstreamFailure::HeaderTimeout | UpstreamFailure::ResponseTimeout => {
            GatewayError::UpstreamTimeout { provider }
        }
        UpstreamFailure::BreakerOpen => GatewayError::ServerBusy,
        failure => GatewayError::UpstreamError {
            provider,
            message: failure.to_string(),
        },
    }
}

/// HTTP KV transport for the cache's remote tier: `GET /{key}` reads,
/// `PUT /{key}` writes with a TTL header. Outages surface as errors the
/// cache counts and absorbs; nothing here is fatal.
pub struct HttpRemoteTier {
    pool: Arc<ProviderPool>,
    base_path: String,
}

impl HttpRemoteTier {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let url = url::Url::parse(base_url)?;
        let base_path = url.path().trim_end_matches('/').to_string();
        Ok(Self {
            pool: Arc::new(ProviderPool::new(base_url, Default::default())?),
            base_path,
        })
    }

    fn key_path(&self, key: &str) -> String {
        // Keys are internal fingerprints (hex digests and fixed prefixes);
        // escape the separator anyway so the path stays unambiguous.
        format!("{}/{}", self.base_path, key.replace('/', "%2F"))
    }
}

#[async_trait]
impl crate::cache::RemoteTier for HttpRemoteTier {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let response = self.pool.get(&self.key_path(key), &[]).await?;
        if response.status.as_u16() == 404 {
            return Ok(None);
        }
        if !response.status.is_success() {
            anyhow::bail!("remote cache returned {}", response.status);
        }
        let body = read_buffered(response, Duration::from_secs(5)).await?;
        Ok(Some(body))
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        let headers = vec![(
            "x-cache-ttl-secs".to_string(),
            ttl.as_secs().to_string(),
        )];
        let response = self
            .pool
            .request("PUT", &self.key_path(key), &headers, value.to_vec())
            .await?;
        if !response.status.is_success() {
            anyhow::bail!("remote cache returned {}", response.status);
        }
        Ok(())
    }
}

/// Transcription transport over a provider-style pool; plugged into the audio
/// extractor when `extraction.transcription_url` is configured.
pub struct HttpTranscriber {
    pool: Arc<ProviderPool>,
    path: String,
}

impl HttpTranscriber {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let url = url::Url::parse(base_url)?;
        let path = if url.path() == "/" || url.path().is_empty() {
            "/v1/audio/transcriptions".to_string()
        } else {
            url.path().to_string()
        };
        Ok(Self {
            pool: Arc::new(ProviderPool::new(base_url, Default::default())?),
            path,
        })
    }
}

#[async_trait]
impl TranscriptionClient for HttpTranscriber {
    async fn transcribe(
        &self,
        bytes: &[u8],
        mime: &str,
    ) -> Result<TranscriptResponse, ExtractError> {
        let headers = vec![("content-type".to_string(), mime.to_string())];
        let response = self
            .pool
            .post(&self.path, &headers, bytes.to_vec())
            .await
            .map_err(|e| ExtractError::Downstream {
                code: "transport".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status;
        let body = read_buffered(response, self.pool.response_timeout())
            .await
            .map_err(|e| ExtractError::Downstream {
                code: "transport".to_string(),
                message: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(ExtractError::Downstream {
                code: status.as_u16().to_string(),
                message: String::from_utf8_lossy(&body).chars().take(200).collect(),
            });
        }

        serde_json::from_slice(&body).map_err(|e| ExtractError::Downstream {
            code: "malformed".to_string(),
            message: format!("unparseable transcription response: {e}"),
        })
    }
}
