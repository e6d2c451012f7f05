//! End-to-end tests over real loopback sockets.
//!
//! Each test boots a gateway instance against a fake provider served on an
//! ephemeral port, then drives it with a plain HTTP/1.1 client. The fake
//! provider speaks just enough of the OpenAI wire to exercise routing,
//! fallback, prompt weaving, and streaming.

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use modelgate::{
    api::{self, AppState},
    cache::Cache,
    catalog::Catalog,
    config::GatewayConfig,
    health::Health,
    ingest::{IngestPipeline, extractors::default_registry},
    metrics::Metrics,
    plugins::rate_limiter::RateLimiter,
    upstream::Dispatcher,
    worker::CpuPool,
};

/// What the fake provider should do per request.
#[derive(Clone)]
enum ProviderScript {
    /// Always return a canned buffered completion.
    Chat(&'static str),
    /// Always return an SSE stream of the given frames.
    Stream(&'static str),
    /// Always return 503.
    Unavailable,
}

#[derive(Default)]
struct ProviderLog {
    bodies: Mutex<Vec<String>>,
}

/// Boots a fake provider; returns its address and a request log.
async fn spawn_provider(script: ProviderScript) -> (SocketAddr, Arc<ProviderLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(ProviderLog::default());

    let task_log = log.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let io = TokioIo::new(stream);
            let script = script.clone();
            let log = task_log.clone();

            tokio::spawn(async move {
                let svc = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let script = script.clone();
                    let log = log.clone();
                    async move {
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        log.bodies
                            .lock()
                            .unwrap()
                            .push(String::from_utf8_lossy(&body).to_string());

                        let response = match script {
                            ProviderScript::Chat(content) => {
                                let json = serde_json::json!({
                                    "id": "chatcmpl-fake",
                                    "object": "chat.completion",
                                    "created": 1,
                                    "model": "fake",
                                    "choices": [{
                                        "index": 0,
                                        "message": { "role": "assistant", "content": content },
                                        "finish_reason": "stop"
                                    }],
                                    "usage": { "prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10 }
                                });
                                hyper::Response::builder()
                                    .status(200)
                                    .header("content-type", "application/json")
                                    .body(Full::new(Bytes::from(json.to_string())))
                                    .unwrap()
                            }
                            ProviderScript::Stream(frames) => hyper::Response::builder()
                                .status(200)
                                .header("content-type", "text/event-stream")
                                .body(Full::new(Bytes::from_static(frames.as_bytes())))
                                .unwrap(),
                            ProviderScript::Unavailable => hyper::Response::builder()
                                .status(503)
                                .header("content-type", "application/json")
                                .body(Full::new(Bytes::from_static(
                                    br#"{"error":{"message":"overloaded"}}"#,
                                )))
                                .unwrap(),
                        };
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = http1::Builder::new().serve_connection(io, svc).await;
            });
        }
    });

    (addr, log)
}

/// Boots a gateway for the given config; returns its address.
async fn spawn_gateway(config: GatewayConfig) -> SocketAddr {
    let metrics = Arc::new(Metrics::default());
    let cache = Arc::new(Cache::new(
        8 * 1024 * 1024,
        Duration::from_secs(300),
        None,
    ));
    let worker = Arc::new(CpuPool::new(2, 16));
    let pipeline = Arc::new(
        IngestPipeline::open(&config, default_registry(None), cache.clone(), worker)
            .await
            .unwrap(),
    );
    let catalog = Arc::new(Catalog::from_config(&config));
    let dispatcher =
        Arc::new(Dispatcher::from_config(&config, catalog.clone(), metrics.clone()).unwrap());
    let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
    let health = Arc::new(Health::new(config.blob_root.clone()));

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

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = modelgate::serve(listener, router).await;
    });
    addr
}

fn config_with_providers(blob_root: &std::path::Path, toml_tail: &str) -> GatewayConfig {
    let mut cfg: GatewayConfig = toml::from_str(toml_tail).unwrap();
    cfg.blob_root = blob_root.to_path_buf();
    cfg
}

/// Minimal HTTP/1.1 client for the tests.
async fn send(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> (StatusCode, http::HeaderMap, Vec<u8>) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io)
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("host", "gateway.test");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Full::new(Bytes::from(body))).unwrap();

    let response = sender.send_request(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes().to_vec();
    (parts.status, parts.headers, bytes)
}

fn chat_body(content: &str, stream: bool) -> Vec<u8> {
    serde_json::json!({
        "messages": [{ "role": "user", "content": content }],
        "stream": stream,
    })
    .to_string()
    .into_bytes()
}

fn multipart_body(boundary: &str, filename: &str, mime: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {mime}\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn health_is_cheap_and_hardened() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = spawn_gateway(config_with_providers(dir.path(), "")).await;

    let (status, headers, body) = send(gateway, "GET", "/health", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "modelgate");

    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("x-request-id").is_some());
    assert!(headers.get("x-ratelimit-limit").is_some());
}

#[tokio::test]
async fn small_text_chat_routes_to_cheapest_fast_model() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, _log) = spawn_provider(ProviderScript::Chat("4")).await;

    let cfg = config_with_providers(
        dir.path(),
        &format!(
            r#"
            [[providers]]
            id = "fake"
            base_url = "http://{provider}"
            adapter = "openai"

            [[providers.models]]
            id = "tiny-cheap"
            cost_per_1k_input = 0.0001
            cost_per_1k_output = 0.0001
            speed_tier = "fast"

            [[providers.models]]
            id = "big-pricey"
            cost_per_1k_input = 0.01
            cost_per_1k_output = 0.03
            speed_tier = "powerful"
            "#
        ),
    );
    let gateway = spawn_gateway(cfg).await;

    let (status, _, body) = send(
        gateway,
        "POST",
        "/api/v1/chat/completions",
        &[("content-type", "application/json")],
        chat_body("2+2?", false),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["model"], "tiny-cheap");
    assert_eq!(json["choices"][0]["message"]["content"], "4");
    assert_eq!(json["usage"]["total_tokens"], 10);
}

#[tokio::test]
async fn upload_then_multimodal_weaves_file_content() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, log) = spawn_provider(ProviderScript::Chat("summary of the notes")).await;

    let cfg = config_with_providers(
        dir.path(),
        &format!(
            r#"
            [[providers]]
            id = "fake"
            base_url = "http://{provider}"
            adapter = "openai"

            [[providers.models]]
            id = "tiny-cheap"
            speed_tier = "fast"
            "#
        ),
    );
    let gateway = spawn_gateway(cfg).await;

    let boundary = "gatewaytestboundary";
    let (status, _, body) = send(
        gateway,
        "POST",
        "/api/v1/upload",
        &[(
            "content-type",
            "multipart/form-data; boundary=gatewaytestboundary",
        )],
        multipart_body(boundary, "notes.txt", "text/plain", b"the moon is made of basalt"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let record: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let file_id = record["id"].as_str().unwrap().to_string();
    assert_eq!(record["size_bytes"], 26);
    assert_eq!(record["detected_mime"], "text/plain");

    let chat = serde_json::json!({
        "messages": [{ "role": "user", "content": "Summarize" }],
        "file_ids": [file_id],
    })
    .to_string()
    .into_bytes();
    let (status, _, body) = send(
        gateway,
        "POST",
        "/api/v1/chat/multimodal",
        &[("content-type", "application/json")],
        chat,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["files_processed"], 1);

    // The woven prompt actually reached the provider.
    let bodies = log.bodies.lock().unwrap();
    let woven = bodies.last().unwrap();
    assert!(woven.contains("the moon is made of basalt"));
    assert!(woven.contains("notes.txt"));
}

#[tokio::test]
async fn primary_503_falls_back_before_first_byte() {
    let dir = tempfile::tempdir().unwrap();
    let (down, _) = spawn_provider(ProviderScript::Unavailable).await;
    let (up, _) = spawn_provider(ProviderScript::Chat("fallback answer")).await;

    let cfg = config_with_providers(
        dir.path(),
        &format!(
            r#"
            [[providers]]
            id = "primary"
            base_url = "http://{down}"
            adapter = "openai"

            [[providers.models]]
            id = "a-primary"
            cost_per_1k_input = 0.0001
            speed_tier = "fast"

            [[providers]]
            id = "backup"
            base_url = "http://{up}"
            adapter = "openai"

            [[providers.models]]
            id = "b-backup"
            cost_per_1k_input = 0.001
            speed_tier = "fast"
            "#
        ),
    );
    let gateway = spawn_gateway(cfg).await;

    let (status, _, body) = send(
        gateway,
        "POST",
        "/api/v1/chat/completions",
        &[("content-type", "application/json")],
        chat_body("hello", false),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["model"], "b-backup");
    assert_eq!(json["choices"][0]["message"]["content"], "fallback answer");
}

#[tokio::test]
async fn streaming_chat_emits_frames_and_done() {
    let dir = tempfile::tempdir().unwrap();
    let frames = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n\
                  data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n\
                  data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
                  data: [DONE]\n\n";
    let (provider, _) = spawn_provider(ProviderScript::Stream(frames)).await;

    let cfg = config_with_providers(
        dir.path(),
        &format!(
            r#"
            [[providers]]
            id = "fake"
            base_url = "http://{provider}"
            adapter = "openai"

            [[providers.models]]
            id = "tiny-cheap"
            speed_tier = "fast"
            "#
        ),
    );
    let gateway = spawn_gateway(cfg).await;

    let (status, headers, body) = send(
        gateway,
        "POST",
        "/api/v1/chat/completions",
        &[("content-type", "application/json")],
        chat_body("say hello", true),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "text/event-stream");

    let text = String::from_utf8(body).unwrap();
    let contents: String = text
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .filter_map(|p| serde_json::from_str::<serde_json::Value>(p).ok())
        .filter_map(|v| {
            v["choices"][0]["delta"]["content"]
                .as_str()
                .map(str::to_owned)
        })
        .collect();
    assert_eq!(contents, "Hello");
    assert!(text.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn oversized_upload_is_rejected_with_no_residue() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config_with_providers(dir.path(), "");
    cfg.max_file_bytes = 1024;
    let gateway = spawn_gateway(cfg).await;

    let boundary = "gatewaytestboundary";
    let big = vec![b'x'; 300 * 1024];
    let (status, _, body) = send(
        gateway,
        "POST",
        "/api/v1/upload",
        &[(
            "content-type",
            "multipart/form-data; boundary=gatewaytestboundary",
        )],
        multipart_body(boundary, "big.txt", "text/plain", &big),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "payload-too-large");

    let (_, _, listing) = send(gateway, "GET", "/api/v1/files", &[], Vec::new()).await;
    let json: serde_json::Value = serde_json::from_slice(&listing).unwrap();
    assert_eq!(json["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn upload_get_delete_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = spawn_gateway(config_with_providers(dir.path(), "")).await;

    let boundary = "gatewaytestboundary";
    let (status, _, body) = send(
        gateway,
        "POST",
        "/api/v1/upload",
        &[(
            "content-type",
            "multipart/form-data; boundary=gatewaytestboundary",
        )],
        multipart_body(boundary, "a.txt", "text/plain", b"short lived"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let record: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let id = record["id"].as_str().unwrap().to_string();

    let (status, _, _) = send(gateway, "GET", &format!("/api/v1/files/{id}"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(
        gateway,
        "DELETE",
        &format!("/api/v1/files/{id}"),
        &[],
        Vec::new(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(gateway, "GET", &format!("/api/v1/files/{id}"), &[], Vec::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "not-found");
}

#[tokio::test]
async fn rate_limit_exhaustion_returns_429_with_headers() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_with_providers(
        dir.path(),
        r#"
        [[rate_limits]]
        route_glob = "/health"
        capacity = 3
        window_seconds = 60
        "#,
    );
    let gateway = spawn_gateway(cfg).await;

    for _ in 0..3 {
        let (status, _, _) = send(gateway, "GET", "/health", &[], Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, headers, body) = send(gateway, "GET", "/health", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    assert!(headers.get("x-ratelimit-reset").is_some());
    assert!(headers.get("retry-after").is_some());

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "rate-limited");
}

#[tokio::test]
async fn analyze_complexity_previews_without_upstream_call() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, log) = spawn_provider(ProviderScript::Chat("unused")).await;

    let cfg = config_with_providers(
        dir.path(),
        &format!(
            r#"
            [[providers]]
            id = "fake"
            base_url = "http://{provider}"
            adapter = "openai"

            [[providers.models]]
            id = "tiny-cheap"
            speed_tier = "fast"
            "#
        ),
    );
    let gateway = spawn_gateway(cfg).await;

    let (status, _, body) = send(
        gateway,
        "POST",
        "/api/v1/analyze-complexity",
        &[("content-type", "application/json")],
        chat_body("2+2?", false),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["complexity"]["score"].as_u64().unwrap() <= 10);
    assert_eq!(json["route"]["selected"], "fake/tiny-cheap");
    // No request ever reached the provider.
    assert!(log.bodies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_message_list_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = spawn_gateway(config_with_providers(dir.path(), "")).await;

    let (status, _, body) = send(
        gateway,
        "POST",
        "/api/v1/chat/completions",
        &[("content-type", "application/json")],
        br#"{"messages": []}"#.to_vec(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "validation-error");
}

#[tokio::test]
async fn models_listing_reports_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, _) = spawn_provider(ProviderScript::Chat("unused")).await;
    let cfg = config_with_providers(
        dir.path(),
        &format!(
            r#"
            [[providers]]
            id = "fake"
            base_url = "http://{provider}"
            adapter = "openai"

            [[providers.models]]
            id = "tiny-cheap"
            capabilities = ["text", "vision"]
            speed_tier = "fast"
            "#
        ),
    );
    let gateway = spawn_gateway(cfg).await;

    let (status, _, body) = send(gateway, "GET", "/api/v1/models", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], "tiny-cheap");
    assert_eq!(data[0]["provider"], "fake");
    assert_eq!(data[0]["available"], true);
}
