//! HTTP server implementation and lifecycle management.
//!
//! Accepts TCP connections and dispatches requests through the router. Each
//! connection runs in its own task; the peer address is attached to request
//! extensions so the context middleware can derive the caller identity.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modelgate::{router::Router, server::serve};
//! use tokio::net::TcpListener;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! let router = Router::new();
//! serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use hyper::{Request, server::conn::http1, service::service_fn};
use tokio::net::TcpListener;

use crate::router::Router;

/// Starts the HTTP server with the given listener and router.
pub async fn serve(listener: TcpListener, router: Router) -> anyhow::Result<()> {
    let router = Arc::new(router);
    router.setup_plugins_once();

    tracing::info!(addr = %listener.local_addr()?, "modelgate listening");

    loop {
        let (stream, addr) = listener.accept().await?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let router = router.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |mut req: Request<_>| {
                let router = router.clone();
                async move {
                    req.extensions_mut().insert(addr);
                    Ok::<_, Infallible>(router.dispatch(req).await)
                }
            });

            let mut http = http1::Builder::new();
            http.keep_alive(true);
            let conn = http.serve_connection(io, svc);

            if let Err(err) = conn.await {
                tracing::debug!(%err, "connection closed with error");
            }
        });
    }
}
