//! TLS-enabled HTTP server.
//!
//! Same accept loop as the plain server, wrapped in rustls. ALPN advertises
//! h2 and http/1.1; whichever the client negotiates picks the connection
//! handler. Certificates and keys load from the PEM paths in the listener
//! configuration.

use std::{convert::Infallible, fs::File, io::BufReader, sync::Arc};

use hyper::{
    Request,
    server::conn::{http1, http2},
    service::service_fn,
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::net::TcpListener;
use tokio_rustls::{TlsAcceptor, rustls::ServerConfig};

use crate::router::Router;

/// Starts the HTTPS server with the given certificates.
pub async fn serve_tls(
    listener: TcpListener,
    router: Router,
    cert_path: &str,
    key_path: &str,
) -> anyhow::Result<()> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    let acceptor = TlsAcceptor::from(Arc::new(config));
    let router = Arc::new(router);
    router.setup_plugins_once();

    tracing::info!(addr = %listener.local_addr()?, "modelgate listening (tls)");

    loop {
        let (stream, addr) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(err) => {
                    tracing::debug!(%err, "TLS handshake failed");
                    return;
                }
            };

            let h2 = tls_stream.get_ref().1.alpn_protocol() == Some(b"h2");
            let io = TokioIo::new(tls_stream);
            let svc = service_fn(move |mut req: Request<_>| {
                let router = router.clone();
                async move {
                    req.extensions_mut().insert(addr);
                    Ok::<_, Infallible>(router.dispatch(req).await)
                }
            });

            if h2 {
                let builder = http2::Builder::new(TokioExecutor::new());
                if let Err(err) = builder.serve_connection(io, svc).await {
                    tracing::debug!(%err, "HTTP/2 connection error");
                }
            } else {
                let mut builder = http1::Builder::new();
                builder.keep_alive(true);
                if let Err(err) = builder.serve_connection(io, svc).await {
                    tracing::debug!(%err, "HTTP/1.1 connection error");
                }
            }
        });
    }
}

/// Loads TLS certificates from a PEM-encoded file.
fn load_certs(path: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let mut rd = BufReader::new(File::open(path)?);
    certs(&mut rd)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("bad certificate in {path}: {e}"))
}

/// Loads a PKCS#8 private key from a PEM-encoded file.
fn load_key(path: &str) -> anyhow::Result<PrivateKeyDer<'static>> {
    let mut rd = BufReader::new(File::open(path)?);
    let key = pkcs8_private_keys(&mut rd)
        .next()
        .ok_or_else(|| anyhow::anyhow!("no private key found in {path}"))??;
    Ok(key.into())
}
