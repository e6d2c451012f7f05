//! Per-provider connection pool.
//!
//! One pool per provider host. TLS connections negotiate ALPN and prefer
//! HTTP/2, whose single connection multiplexes all in-flight requests; hosts
//! that only speak HTTP/1.1 (and plain-TCP local providers like Ollama) get
//! keep-alive connections parked in an idle list and re-used after their
//! response body has been drained. Total in-flight requests per provider are
//! bounded by a semaphore sized from `max_connections`.
//!
//! The pool enforces the connect and response-header timeouts; first-byte and
//! full-response deadlines belong to the dispatcher, which is the one reading
//! the body.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::Full;
use hyper::{
    body::Incoming,
    client::conn::{http1, http2},
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{OwnedSemaphorePermit, Semaphore},
    time::{Instant, timeout},
};
use tokio_rustls::TlsConnector;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::config::PoolConfig;

/// Transport-level and protocol-level upstream failures.
#[derive(Debug, Clone, Error)]
pub enum UpstreamFailure {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("no response headers within the header timeout")]
    HeaderTimeout,
    #[error("response exceeded the full-response timeout")]
    ResponseTimeout,
    #[error("i/o failure: {0}")]
    Io(String),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("circuit breaker is open")]
    BreakerOpen,
    #[error("request cancelled")]
    Cancelled,
}

impl UpstreamFailure {
    /// Whether a fresh attempt against another target may succeed, given that
    /// nothing has been delivered to the client yet. Timeouts qualify only
    /// when the upstream never returned a status line.
    pub fn retryable(&self) -> bool {
        match self {
            UpstreamFailure::Connect(_)
            | UpstreamFailure::Tls(_)
            | UpstreamFailure::HeaderTimeout
            | UpstreamFailure::BreakerOpen => true,
            UpstreamFailure::Status(code) => matches!(*code, 502 | 503 | 504),
            _ => false,
        }
    }

    /// Whether the failure counts against the circuit breaker.
    pub fn counts_as_breaker_failure(&self) -> bool {
        match self {
            UpstreamFailure::Status(code) => *code >= 500,
            UpstreamFailure::BreakerOpen | UpstreamFailure::Cancelled => false,
            _ => true,
        }
    }
}

type H1Sender = http1::SendRequest<Full<Bytes>>;
type H2Sender = http2::SendRequest<Full<Bytes>>;

enum Sender {
    H1(H1Sender),
    H2(H2Sender),
}

/// A response checked out of the pool; the permit rides along until the
/// caller is done with the body.
pub struct PooledResponse {
    pub status: StatusCode,
    pub headers: http::HeaderMap,
    pub body: Incoming,
    _permit: OwnedSemaphorePermit,
    /// Held additionally for requests multiplexed on the shared HTTP/2
    /// connection, bounding its concurrent streams.
    _stream_permit: Option<OwnedSemaphorePermit>,
}

/// Connection pool for one provider host.
pub struct ProviderPool {
    host: String,
    port: u16,
    tls: bool,
    cfg: PoolConfig,
    tls_config: Arc<ClientConfig>,
    h2: Mutex<Option<H2Sender>>,
    h2_streams: Arc<Semaphore>,
    idle_h1: Arc<Mutex<Vec<(H1Sender, Instant)>>>,
    permits: Arc<Semaphore>,
}

impl ProviderPool {
    /// Builds a pool from a provider base URL like `https://api.openai.com`
    /// or `http://127.0.0.1:11434`.
    pub fn new(base_url: &str, cfg: PoolConfig) -> anyhow::Result<Self> {
        let url = url::Url::parse(base_url)?;
        let tls = url.scheme() == "https";
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("provider base_url has no host: {base_url}"))?
            .to_string();
        let port = url.port().unwrap_or(if tls { 443 } else { 80 });

        let mut roots = RootCertStore::empty();
        roots.extend(TLS_SERVER_ROOTS.iter().cloned());
        let mut tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        tls_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        let permits = Arc::new(Semaphore::new(cfg.max_connections.max(1)));
        let h2_streams = Arc::new(Semaphore::new(cfg.max_streams_per_connection.max(1)));

        Ok(Self {
            host,
            port,
            tls,
            cfg,
            tls_config: Arc::new(tls_config),
            h2: Mutex::new(None),
            h2_streams,
            idle_h1: Arc::new(Mutex::new(Vec::new())),
            permits,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.connect_timeout_secs)
    }

    fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.header_timeout_secs)
    }

    /// First-byte deadline, consumed by the dispatcher.
    pub fn first_byte_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.first_byte_timeout_secs)
    }

    /// Full-response deadline, consumed by the dispatcher.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.response_timeout_secs)
    }

    async fn dial(&self) -> Result<Sender, UpstreamFailure> {
        let tcp = timeout(
            self.connect_timeout(),
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| UpstreamFailure::Connect("connect timeout".to_string()))?
        .map_err(|e| UpstreamFailure::Connect(e.to_string()))?;
        let _ = tcp.set_nodelay(true);

        if !self.tls {
            let io = TokioIo::new(tcp);
            let (sender, conn) = http1::handshake(io)
                .await
                .map_err(|e| UpstreamFailure::Io(e.to_string()))?;
            tokio::spawn(async move {
                let _ = conn.await;
            });
            return Ok(Sender::H1(sender));
        }

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| UpstreamFailure::Tls(e.to_string()))?;
        let connector = TlsConnector::from(self.tls_config.clone());
        let tls_stream = timeout(self.connect_timeout(), connector.connect(server_name, tcp))
            .await
            .map_err(|_| UpstreamFailure::Tls("handshake timeout".to_string()))?
            .map_err(|e| UpstreamFailure::Tls(e.to_string()))?;

        let negotiated_h2 = tls_stream.get_ref().1.alpn_protocol() == Some(b"h2");
        let io = TokioIo::new(tls_stream);

        if negotiated_h2 {
            let (sender, conn) = http2::Builder::new(TokioExecutor::new())
                .handshake(io)
                .await
                .map_err(|e| UpstreamFailure::Io(e.to_string()))?;
            tokio::spawn(async move {
                let _ = conn.await;
            });
            *self.h2.lock() = Some(sender.clone());
            Ok(Sender::H2(sender))
        } else {
            let (sender, conn) = http1::handshake(io)
                .await
                .map_err(|e| UpstreamFailure::Io(e.to_string()))?;
            tokio::spawn(async move {
                let _ = conn.await;
            });
            Ok(Sender::H1(sender))
        }
    }

    /// Picks a live sender: the shared HTTP/2 connection if one exists, an
    /// idle HTTP/1.1 connection otherwise, a fresh dial as the last resort.
    async fn checkout(&self) -> Result<Sender, UpstreamFailure> {
        if let Some(h2) = self.h2.lock().clone() {
            if !h2.is_closed() {
                return Ok(Sender::H2(h2));
            }
            *self.h2.lock() = None;
        }

        let idle_for = Duration::from_secs(self.cfg.idle_timeout_secs);
        loop {
            let candidate = self.idle_h1.lock().pop();
            match candidate {
                Some((sender, parked_at)) => {
                    if parked_at.elapsed() < idle_for && !sender.is_closed() {
                        return Ok(Sender::H1(sender));
                    }
                    // expired or dead; drop and keep looking
                }
                None => break,
            }
        }

        self.dial().await
    }

    /// Sends a POST with a buffered body; returns status, headers, and the
    /// still-streaming response body.
    pub async fn post(
        &self,
        path: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<PooledResponse, UpstreamFailure> {
        self.request("POST", path, headers, body).await
    }

    /// Sends a GET; used by the remote cache tier.
    pub async fn get(
        &self,
        path: &str,
        headers: &[(String, String)],
    ) -> Result<PooledResponse, UpstreamFailure> {
        self.request("GET", path, headers, Vec::new()).await
    }

    /// Sends a request over a pooled connection.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<PooledResponse, UpstreamFailure> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| UpstreamFailure::Io("pool closed".to_string()))?;

        // A parked connection may have died since it was checked; retry once
        // with a guaranteed-fresh dial.
        let mut last_err = None;
        for fresh in [false, true] {
            let sender = if fresh {
                self.dial().await?
            } else {
                self.checkout().await?
            };

            let stream_permit = match &sender {
                Sender::H2(_) => Some(
                    self.h2_streams
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| UpstreamFailure::Io("pool closed".to_string()))?,
                ),
                Sender::H1(_) => None,
            };

            match self
                .send_once(sender, method, path, headers, body.clone())
                .await
            {
                Ok((status, response_headers, body)) => {
                    return Ok(PooledResponse {
                        status,
                        headers: response_headers,
                        body,
                        _permit: permit,
                        _stream_permit: stream_permit,
                    });
                }
                Err(err @ UpstreamFailure::Io(_)) if !fresh => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| UpstreamFailure::Io("send failed".to_string())))
    }

    async fn send_once(
        &self,
        sender: Sender,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<(StatusCode, http::HeaderMap, Incoming), UpstreamFailure> {
        let authority = if (self.tls && self.port == 443) || (!self.tls && self.port == 80) {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        };

        let mut builder = Request::builder().method(method);
        builder = match &sender {
            // HTTP/2 wants the authority in the URI; HTTP/1.1 wants a Host
            // header and an origin-form path.
            Sender::H2(_) => builder.uri(format!(
                "{}://{}{}",
                if self.tls { "https" } else { "http" },
                authority,
                path
            )),
            Sender::H1(_) => builder.uri(path).header("host", authority.clone()),
        };
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let request = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| UpstreamFailure::Io(e.to_string()))?;

        let response = match sender {
            Sender::H2(mut h2) => timeout(self.header_timeout(), h2.send_request(request))
                .await
                .map_err(|_| UpstreamFailure::HeaderTimeout)?
                .map_err(|e| UpstreamFailure::Io(e.to_string()))?,
            Sender::H1(mut h1) => {
                let response = timeout(self.header_timeout(), h1.send_request(request))
                    .await
                    .map_err(|_| UpstreamFailure::HeaderTimeout)?
                    .map_err(|e| UpstreamFailure::Io(e.to_string()))?;

                // Park the connection for reuse. `ready()` resolves once the
                // response body has been drained and the connection can carry
                // another request; an early-dropped body errors it out and
                // the connection is simply discarded.
                let idle = self.idle_h1.clone();
                tokio::spawn(async move {
                    if h1.ready().await.is_ok() {
                        idle.lock().push((h1, Instant::now()));
                    }
                });
                response
            }
        };

        let (parts, body) = response.into_parts();
        Ok((parts.status, parts.headers, body))
    }
}
