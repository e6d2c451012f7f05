//! Per-request context: identity, request id, deadline, cancellation.
//!
//! Every inbound request carries an explicit [`RequestContext`] in its
//! extensions instead of reaching for ambient globals. The context middleware
//! builds it from the connection's peer address, the optional `X-API-Key`
//! header, and the optional `X-Request-Id` header (echoed back, generated when
//! absent). The deadline is the route default; the upstream dispatcher tightens
//! it further with the provider's first-byte and full-response timeouts.
//!
//! Cancellation is cooperative: dropping the client connection cancels the
//! token, and every suspension point down the chain (the upstream pump, the
//! extraction dispatch, the CPU pool) observes it.

use std::{
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use http::HeaderValue;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{middleware::Next, types::Request};

/// Caller identity used for rate limiting and file visibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Source IP of the connection (the default identity).
    Ip(IpAddr),
    /// Presented API key (the configured header), verified by the security filter.
    ApiKey(String),
}

impl Identity {
    /// Stable string form used in bucket keys and log fields.
    pub fn key(&self) -> String {
        match self {
            Identity::Ip(ip) => format!("ip:{ip}"),
            Identity::ApiKey(k) => format!("key:{k}"),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Explicit per-request context threaded through the middleware chain.
#[derive(Clone)]
pub struct RequestContext {
    /// Correlation id, echoed in the `X-Request-Id` response header.
    pub request_id: String,
    /// Caller identity (API key when presented, source IP otherwise).
    pub identity: Identity,
    /// Source IP, kept separately so IP-keyed rate rules still apply to
    /// key-authenticated callers.
    pub peer: IpAddr,
    /// Absolute deadline for the whole request.
    pub deadline: Instant,
    /// Cooperative cancellation signal; cancelled when the client goes away.
    pub cancel: CancellationToken,
    /// Wall-clock start, used for latency accounting.
    pub started_at: Instant,
}

impl RequestContext {
    /// Builds a context for a request arriving from `peer`.
    pub fn new(
        request_id: String,
        peer: Option<SocketAddr>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let peer = peer
            .map(|sa| sa.ip())
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let identity = match api_key {
            Some(key) => Identity::ApiKey(key),
            None => Identity::Ip(peer),
        };
        let now = Instant::now();
        Self {
            request_id,
            identity,
            peer,
            deadline: now + timeout,
            cancel: CancellationToken::new(),
            started_at: now,
        }
    }

    /// Remaining budget before the request deadline, zero when exceeded.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Header carrying a caller-supplied correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying a caller-supplied timeout in seconds; the effective
/// deadline is the lesser of this and the route default.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-secs";

/// Context middleware: attaches a [`RequestContext`] and echoes the request id.
///
/// Must be registered before any middleware that reads the context (rate
/// limiter, access log). `api_key_header` names the configured key header; the
/// raw value becomes the identity only after the security filter has accepted
/// it, so an invalid key never creates a privileged bucket.
pub fn middleware(
    api_key_header: Option<String>,
    timeout: Duration,
) -> impl Fn(
    Request,
    Next,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = crate::types::Response> + Send + 'static>,
> + Clone
+ Send
+ Sync
+ 'static {
    move |mut req: Request, next: Next| {
        let api_key_header = api_key_header.clone();
        Box::pin(async move {
            let request_id = req
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty() && v.len() <= 128)
                .map(str::to_owned)
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            let peer = req.extensions().get::<SocketAddr>().copied();
            let api_key = api_key_header.as_deref().and_then(|name| {
                req.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
            });

            let effective_timeout = req
                .headers()
                .get(REQUEST_TIMEOUT_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .map_or(timeout, |client| client.min(timeout));

            let ctx = RequestContext::new(request_id.clone(), peer, api_key, effective_timeout);
            let cancel = ctx.cancel.clone();
            req.extensions_mut().insert(ctx);

            // If the connection task is torn down mid-handler (client
            // disconnect), the guard drops unarmed and cancels everything
            // still in flight. Once a response exists, responsibility moves
            // to the response body: the streaming proxy installs its own
            // guard on the same token.
            let guard = cancel.clone().drop_guard();
            let mut res = next.run(req).await;
            let _ = guard.disarm();

            if let Ok(value) = HeaderValue::from_str(&request_id) {
                res.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            res
        })
    }
}
