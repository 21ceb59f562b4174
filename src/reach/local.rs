//! Plain HTTP on the local network

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::DEV_PATH;
use crate::server::{self, AppState};
use crate::types::Result;

use super::{bind_all, detect_lan_ip, Listeners, Reachability, ReachabilityDescriptor, TransportKind};

/// Serve over plain HTTP on the LAN address.
///
/// Only useful when the phone's wallet browser accepts insecure origins.
pub struct LocalBind {
    port: u16,
    public_host: Option<String>,
    listeners: Option<Listeners>,
}

impl LocalBind {
    /// `port` 0 picks an ephemeral port
    pub fn new(port: u16, public_host: Option<String>) -> Self {
        Self {
            port,
            public_host,
            listeners: None,
        }
    }
}

#[async_trait]
impl Reachability for LocalBind {
    fn kind(&self) -> TransportKind {
        TransportKind::Plain
    }

    async fn start(&mut self, state: Arc<AppState>) -> Result<ReachabilityDescriptor> {
        let listener = bind_all(self.port).await?;
        let local_addr = listener.local_addr()?;

        let host = self
            .public_host
            .clone()
            .unwrap_or_else(|| detect_lan_ip().to_string());
        let base_url = format!("http://{}:{}{}", host, local_addr.port(), DEV_PATH);

        let mut listeners = Listeners::new();
        let shutdown = listeners.subscribe();
        listeners.push(tokio::spawn(server::serve(listener, state, shutdown)));
        self.listeners = Some(listeners);

        info!("Local endpoint listening on {}", local_addr);
        info!("Open on phone: {}", base_url);

        Ok(ReachabilityDescriptor {
            base_url,
            transport: TransportKind::Plain,
            local_addrs: vec![local_addr],
        })
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(listeners) = self.listeners.take() {
            listeners.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ArtifactStore, MarkerFile};

    fn state(dir: &std::path::Path) -> Arc<AppState> {
        Arc::new(AppState::new(
            Arc::new(ArtifactStore::default()),
            MarkerFile::new(dir),
        ))
    }

    #[tokio::test]
    async fn test_start_reports_dev_wallet_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut bind = LocalBind::new(0, Some("127.0.0.1".to_string()));

        let descriptor = bind.start(state(dir.path())).await.unwrap();
        let port = descriptor.local_addrs[0].port();
        assert_ne!(port, 0);
        assert_eq!(
            descriptor.base_url,
            format!("http://127.0.0.1:{}/dev-wallet", port)
        );

        let health: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{}/health", port))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["healthy"], true);

        bind.stop().await.unwrap();
        // Second stop is a no-op
        bind.stop().await.unwrap();
    }
}
