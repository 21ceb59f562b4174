//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo. The same request handler serves plain TCP
//! and TLS connections; reachability strategies decide which listeners exist.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::{DEV_PATH, SECURE_PATH};
use crate::routes::{self, SessionQuery};
use crate::session::{ArtifactStore, MarkerFile};

/// Shared application state
pub struct AppState {
    /// Keyed session registry
    pub store: Arc<ArtifactStore>,
    /// Durable marker for signed artifacts
    pub marker: MarkerFile,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<ArtifactStore>, marker: MarkerFile) -> Self {
        Self {
            store,
            marker,
            started_at: Instant::now(),
        }
    }
}

/// Which address family a request came in through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Dev,
    Secure,
    Root,
}

/// Split a path into access mode and the route below the prefix
pub fn split_prefix(path: &str) -> (AccessMode, &str) {
    for (prefix, mode) in [(DEV_PATH, AccessMode::Dev), (SECURE_PATH, AccessMode::Secure)] {
        if let Some(rest) = path.strip_prefix(prefix) {
            if rest.is_empty() {
                return (mode, "/");
            }
            if rest.starts_with('/') {
                return (mode, rest);
            }
        }
    }
    (AccessMode::Root, path)
}

/// Accept plain TCP connections until `shutdown` flips to true
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let local = listener.local_addr().ok();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        serve_connection(stream, addr, state).await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            _ = shutdown.changed() => {
                info!(addr = ?local, "HTTP listener stopped");
                return;
            }
        }
    }
}

/// Accept TLS connections until `shutdown` flips to true
pub async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let local = listener.local_addr().ok();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls) => serve_connection(tls, addr, state).await,
                            Err(e) => warn!("TLS handshake with {} failed: {}", addr, e),
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting TLS connection: {:?}", e);
                }
            },
            _ = shutdown.changed() => {
                info!(addr = ?local, "HTTPS listener stopped");
                return;
            }
        }
    }
}

async fn serve_connection<I>(io: I, addr: SocketAddr, state: Arc<AppState>)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(io);

    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { handle_request(state, addr, req).await }
    });

    if let Err(err) = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service)
        .await
    {
        error!("Error serving connection from {}: {:?}", addr, err);
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let host = req
        .headers()
        .get("host")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    info!("[{}] {} {} (host: {})", addr, method, path, host);
    debug!(headers = ?req.headers(), "Request headers");

    let query = SessionQuery::parse(req.uri().query());
    let (mode, route) = split_prefix(&path);

    let response = match (method, route) {
        (Method::OPTIONS, _) => routes::preflight_response(),

        (Method::GET, "/") | (Method::GET, "/index.html") => routes::signing_page(),

        (Method::GET, "/transaction") => routes::get_transaction(&state, &query),

        (Method::POST, "/signed") => routes::post_signed(req, Arc::clone(&state), &query).await,

        (Method::GET, "/qr") | (Method::GET, "/server-qr.png") => routes::get_qr(&state, &query),

        (Method::GET, "/session") => routes::session_status(&state, &query),

        (Method::GET, "/health") => routes::health_check(&state),

        (Method::GET, "/version") => routes::version_info(),

        // Client-side routes under a prefix fall back to the signing page
        (Method::GET, _) if mode != AccessMode::Root => {
            debug!("Fallback: serving signing page for {}", path);
            routes::signing_page()
        }

        _ => routes::not_found_response(&path),
    };

    Ok(response)
}
