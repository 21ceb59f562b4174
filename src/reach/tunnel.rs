//! Public forwarding tunnel
//!
//! Serves plain HTTP locally and asks a relay for a public HTTPS address that
//! forwards to it. The relay speaks the localtunnel protocol: a GET on
//! `<host>/<subdomain>` allocates the subdomain and returns a TCP port on the
//! relay; the client then keeps a pool of connections to that port open and
//! pipes each one to the local listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::{self, AppState};
use crate::types::{HandoffError, Result};

use super::{bind_all, Listeners, Reachability, ReachabilityDescriptor, TransportKind};

/// Something that happened to an open tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    /// A forwarded connection failed; the tunnel may still be up
    Error(String),
    /// The relay is gone
    Closed,
}

/// An allocated tunnel
pub struct TunnelLease {
    /// Public URL the relay forwards from
    pub url: String,
    pub events: mpsc::UnboundedReceiver<TunnelEvent>,
    /// Forwarding tasks, aborted on teardown
    pub tasks: Vec<JoinHandle<()>>,
}

/// Allocates public URLs that forward to a local port
#[async_trait]
pub trait TunnelRelay: Send + Sync {
    async fn open(&self, subdomain: &str, local_port: u16) -> Result<TunnelLease>;
}

/// Relay allocation response
#[derive(Debug, Deserialize)]
struct TunnelInfo {
    id: String,
    port: u16,
    #[serde(default = "default_max_conn")]
    max_conn_count: usize,
    url: String,
}

fn default_max_conn() -> usize {
    10
}

/// localtunnel-protocol client
pub struct LocalTunnelRelay {
    http: reqwest::Client,
    host: String,
}

impl LocalTunnelRelay {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            host: host.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TunnelRelay for LocalTunnelRelay {
    async fn open(&self, subdomain: &str, local_port: u16) -> Result<TunnelLease> {
        let endpoint = format!("{}/{}", self.host, subdomain);
        debug!("Requesting tunnel from {}", endpoint);

        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| HandoffError::Reachability(format!("relay request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(HandoffError::Reachability(format!(
                "relay returned {}",
                response.status()
            )));
        }
        let info: TunnelInfo = response
            .json()
            .await
            .map_err(|e| HandoffError::Reachability(format!("bad relay response: {}", e)))?;

        let relay_host = reqwest::Url::parse(&self.host)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| HandoffError::Config(format!("invalid tunnel host {}", self.host)))?;

        info!(id = %info.id, url = %info.url, relay_port = info.port, "Tunnel allocated");

        let (tx, events) = mpsc::unbounded_channel();
        let tasks = (0..info.max_conn_count.max(1))
            .map(|_| {
                tokio::spawn(forward_loop(
                    relay_host.clone(),
                    info.port,
                    local_port,
                    tx.clone(),
                ))
            })
            .collect();

        Ok(TunnelLease {
            url: info.url,
            events,
            tasks,
        })
    }
}

/// Keep one relay connection open, piping each to the local listener
async fn forward_loop(
    relay_host: String,
    relay_port: u16,
    local_port: u16,
    events: mpsc::UnboundedSender<TunnelEvent>,
) {
    loop {
        let mut remote = match TcpStream::connect((relay_host.as_str(), relay_port)).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Relay connection failed: {}", e);
                let _ = events.send(TunnelEvent::Closed);
                return;
            }
        };

        let mut local = match TcpStream::connect(("127.0.0.1", local_port)).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = events.send(TunnelEvent::Error(format!("local connect failed: {}", e)));
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        if let Err(e) = tokio::io::copy_bidirectional(&mut remote, &mut local).await {
            let _ = events.send(TunnelEvent::Error(e.to_string()));
        }
    }
}

/// Random DNS-safe subdomain
fn random_subdomain() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("handoff-{}", suffix.to_lowercase())
}

pub struct TunnelBind {
    port: u16,
    relay: Arc<dyn TunnelRelay>,
    attempts: u32,
    backoff: Duration,
    alive: Arc<AtomicBool>,
    listeners: Option<Listeners>,
    forwarders: Vec<JoinHandle<()>>,
}

impl TunnelBind {
    pub fn new(port: u16, relay: Arc<dyn TunnelRelay>, attempts: u32, backoff: Duration) -> Self {
        Self {
            port,
            relay,
            attempts: attempts.max(1),
            backoff,
            alive: Arc::new(AtomicBool::new(false)),
            listeners: None,
            forwarders: Vec::new(),
        }
    }

    /// Ask the relay for a tunnel, retrying with a fixed backoff
    async fn open_with_retry(&self, local_port: u16) -> Result<TunnelLease> {
        let mut last_error = String::new();
        for attempt in 1..=self.attempts {
            let subdomain = random_subdomain();
            match self.relay.open(&subdomain, local_port).await {
                Ok(lease) => {
                    info!(attempt, subdomain = %subdomain, "Tunnel established");
                    return Ok(lease);
                }
                Err(e) => {
                    warn!(attempt, max = self.attempts, error = %e, "Tunnel attempt failed");
                    last_error = e.to_string();
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }
        Err(HandoffError::TunnelUnavailable {
            attempts: self.attempts,
            last_error,
        })
    }
}

#[async_trait]
impl Reachability for TunnelBind {
    fn kind(&self) -> TransportKind {
        TransportKind::Tunneled
    }

    async fn start(&mut self, state: Arc<AppState>) -> Result<ReachabilityDescriptor> {
        let listener = bind_all(self.port).await?;
        let local_addr = listener.local_addr()?;

        let mut listeners = Listeners::new();
        let shutdown = listeners.subscribe();
        listeners.push(tokio::spawn(server::serve(listener, state, shutdown)));

        let lease = match self.open_with_retry(local_addr.port()).await {
            Ok(lease) => lease,
            Err(e) => {
                listeners.shutdown().await;
                return Err(e);
            }
        };

        self.alive.store(true, Ordering::SeqCst);
        let alive = Arc::clone(&self.alive);
        let mut events = lease.events;
        let monitor = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TunnelEvent::Error(e) => warn!("Tunnel error: {}", e),
                    TunnelEvent::Closed => {
                        warn!("Tunnel closed by relay");
                        alive.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        });

        self.forwarders = lease.tasks;
        self.forwarders.push(monitor);
        self.listeners = Some(listeners);

        info!("Local endpoint listening on {}", local_addr);
        info!("Open on phone: {}", lease.url);

        Ok(ReachabilityDescriptor {
            base_url: lease.url,
            transport: TransportKind::Tunneled,
            local_addrs: vec![local_addr],
        })
    }

    async fn stop(&mut self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        for task in self.forwarders.drain(..) {
            task.abort();
        }
        if let Some(listeners) = self.listeners.take() {
            listeners.shutdown().await;
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
