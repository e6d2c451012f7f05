//! Gateway binary: configuration, wiring, background tasks, serve loop.

use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::net::TcpListener;

use modelgate::{
    api::{self, AppState},
    cache::Cache,
    catalog::Catalog,
    config::GatewayConfig,
    health::Health,
    ingest::{IngestPipeline, extractors::default_registry},
    metrics::Metrics,
    plugins::rate_limiter::RateLimiter,
    tracing::init_tracing,
    upstream::{Dispatcher, HttpRemoteTier, HttpTranscriber},
    worker::CpuPool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => GatewayConfig::load(&PathBuf::from(path))?,
        None => GatewayConfig::default(),
    };

    init_tracing(config.observability.log_format, &config.observability.log_level);

    let metrics = Arc::new(Metrics::default());

    let remote_tier = match &config.cache.remote_url {
        Some(url) => Some(Arc::new(HttpRemoteTier::new(url)?) as Arc<dyn modelgate::cache::RemoteTier>),
        None => None,
    };
    let cache = Arc::new(Cache::new(
        config.cache.local_bytes,
        Duration::from_secs(config.cache.default_ttl_secs),
        remote_tier,
    ));

    let transcriber = match &config.extraction.transcription_url {
        Some(url) => {
            Some(Arc::new(HttpTranscriber::new(url)?)
                as Arc<dyn modelgate::ingest::extractors::audio::TranscriptionClient>)
        }
        None => None,
    };

    let worker = Arc::new(CpuPool::new(config.worker.slots, config.worker.queue));
    let pipeline = Arc::new(
        IngestPipeline::open(&config, default_registry(transcriber), cache.clone(), worker).await?,
    );

    let catalog = Arc::new(Catalog::from_config(&config));
    let dispatcher = Arc::new(Dispatcher::from_config(&config, catalog.clone(), metrics.clone())?);
    let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
    let health = Arc::new(Health::new(config.blob_root.clone()));

    spawn_retention_sweeper(pipeline.clone());
    spawn_provider_prober(dispatcher.clone(), health.clone());

    let listen = format!("{}:{}", config.listen_address, config.listen_port);
    let tls = config
        .tls_cert
        .clone()
        .zip(config.tls_key.clone());

    let state = Arc::new(AppState {
        config,
        cache,
        catalog,
        pipeline,
        dispatcher,
        limiter,
        metrics,
        health,
    });
    let router = api::build_router(state);

    let listener = TcpListener::bind(&listen).await?;
    match tls {
        Some((cert, key)) => modelgate::serve_tls(listener, router, &cert, &key).await,
        None => modelgate::serve(listener, router).await,
    }
}

/// Deletes expired blobs on a timer; cached extractions are keyed by content
/// hash and survive the sweep.
fn spawn_retention_sweeper(pipeline: Arc<IngestPipeline>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(600));
        loop {
            tick.tick().await;
            pipeline.sweep_expired().await;
        }
    });
}

/// Probes provider reachability with a plain TCP connect.
fn spawn_provider_prober(dispatcher: Arc<Dispatcher>, health: Arc<Health>) {
    tokio::spawn(async move {
        let targets = dispatcher.probe_targets();
        let mut tick = tokio::time::interval(Health::PROBE_INTERVAL);
        loop {
            tick.tick().await;
            for (id, host, port) in &targets {
                let ok = tokio::time::timeout(
                    Duration::from_secs(3),
                    tokio::net::TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);
                health.record_probe(id, ok);
            }
        }
    });
}
