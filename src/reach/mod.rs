//! Reachability Provisioner
//!
//! How the phone gets a network path to the Exchange Endpoint. Three
//! interchangeable strategies share one contract; a deployment picks one at
//! startup and keeps it for the whole handshake.
//!
//! | Strategy     | Listeners             | Base URL                                   |
//! |--------------|-----------------------|--------------------------------------------|
//! | `LocalBind`  | HTTP                  | `http://<lan-ip>:<port>/dev-wallet`        |
//! | `SecureBind` | HTTP + HTTPS          | `https://<hostname>:<tls-port>/secure-wallet` |
//! | `TunnelBind` | HTTP + relay tunnel   | the relay's public URL                     |

pub mod local;
pub mod secure;
pub mod tunnel;

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{Args, Strategy};
use crate::server::AppState;
use crate::types::{HandoffError, Result};

pub use local::LocalBind;
pub use secure::SecureBind;
pub use tunnel::{LocalTunnelRelay, TunnelBind, TunnelEvent, TunnelLease, TunnelRelay};

/// Transport the phone uses to reach us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Plain,
    Secure,
    Tunneled,
}

/// What a started strategy exposes to the orchestrator
#[derive(Debug, Clone)]
pub struct ReachabilityDescriptor {
    /// Externally reachable root, encoded into the QR code
    pub base_url: String,
    pub transport: TransportKind,
    /// Local addresses the listeners are bound to
    pub local_addrs: Vec<SocketAddr>,
}

/// A way of making the Exchange Endpoint reachable from the phone
#[async_trait]
pub trait Reachability: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Bind listeners (and tunnels) and report the public base URL
    async fn start(&mut self, state: Arc<AppState>) -> Result<ReachabilityDescriptor>;

    /// Release everything `start` acquired. Safe to call more than once.
    async fn stop(&mut self) -> Result<()>;

    /// False once the path to the phone is known to be gone
    fn is_alive(&self) -> bool {
        true
    }
}

/// Build the strategy selected on the command line
pub fn from_args(args: &Args) -> Box<dyn Reachability> {
    match args.strategy {
        Strategy::Local => Box::new(LocalBind::new(args.port, args.public_host.clone())),
        Strategy::Secure => Box::new(SecureBind::new(
            args.port,
            args.secure_port,
            args.key_path(),
            args.cert_path(),
            args.public_host.clone(),
        )),
        Strategy::Tunnel => Box::new(TunnelBind::new(
            args.port,
            Arc::new(LocalTunnelRelay::new(args.tunnel_host.clone())),
            args.tunnel_attempts,
            args.tunnel_backoff(),
        )),
    }
}

/// Teardown handle for the listeners a strategy spawned
pub(crate) struct Listeners {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Listeners {
    pub(crate) fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                debug!("Listener task ended abnormally: {}", e);
            }
        }
    }
}

/// Bind a TCP listener on all interfaces
pub(crate) async fn bind_all(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            HandoffError::Reachability(format!("port {} is already in use", port))
        } else {
            HandoffError::Reachability(format!("cannot bind {}: {}", addr, e))
        }
    })
}

/// Best-effort LAN address of this machine.
///
/// Connecting a UDP socket sends nothing but makes the OS pick the outbound
/// interface, whose address is what other devices on the network can reach.
pub fn detect_lan_ip() -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Machine hostname, falling back to `localhost`
pub fn detect_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_conflict_is_reachability_error() {
        let first = bind_all(0).await.unwrap();
        let port = first.local_addr().unwrap().port();

        let err = bind_all(port).await.unwrap_err();
        assert!(matches!(err, HandoffError::Reachability(_)));
        assert!(err.to_string().contains(&port.to_string()));
    }

    #[test]
    fn test_from_args_picks_strategy() {
        use clap::Parser;

        let args = Args::try_parse_from([
            "handoff", "--rpc-url", "http://localhost:8545", "--bytecode", "0x00",
            "--strategy", "secure", "--cert-dir", "/etc/handoff",
        ])
        .unwrap();
        assert_eq!(args.key_path(), std::path::Path::new("/etc/handoff/key.pem"));
        assert_eq!(args.cert_path(), std::path::Path::new("/etc/handoff/cert.pem"));
        assert_eq!(from_args(&args).kind(), TransportKind::Secure);
    }

    #[test]
    fn test_hostname_is_non_empty() {
        assert!(!detect_hostname().is_empty());
    }
}
