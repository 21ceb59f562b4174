//! HTTPS with pre-provisioned certificates
//!
//! Wallet browsers refuse injected-provider calls on insecure origins, so this
//! strategy adds a TLS listener next to the plain one. Certificates are never
//! generated here; the operator provisions them (usually with mkcert) and
//! installs the root on the phone.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::config::SECURE_PATH;
use crate::server::{self, AppState};
use crate::types::{HandoffError, Result};

use super::{
    bind_all, detect_hostname, detect_lan_ip, Listeners, Reachability, ReachabilityDescriptor,
    TransportKind,
};

pub struct SecureBind {
    port: u16,
    secure_port: u16,
    key_path: PathBuf,
    cert_path: PathBuf,
    public_host: Option<String>,
    listeners: Option<Listeners>,
}

impl SecureBind {
    pub fn new(
        port: u16,
        secure_port: u16,
        key_path: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
        public_host: Option<String>,
    ) -> Self {
        Self {
            port,
            secure_port,
            key_path: key_path.into(),
            cert_path: cert_path.into(),
            public_host,
            listeners: None,
        }
    }

    fn hostname(&self) -> String {
        self.public_host.clone().unwrap_or_else(detect_hostname)
    }

    /// Fail with the exact commands that would fix a missing key or cert
    fn check_certificates(&self) -> Result<()> {
        if self.key_path.is_file() && self.cert_path.is_file() {
            return Ok(());
        }

        let remediation = format!(
            "Generate them with mkcert:\n  \
             mkdir -p {dir}\n  \
             mkcert -key-file {key} -cert-file {cert} \"{host}\" localhost 127.0.0.1 {ip}\n\
             Then install the mkcert root CA on the phone (mkcert -CAROOT shows where it lives).",
            dir = self
                .cert_path
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".".to_string()),
            key = self.key_path.display(),
            cert = self.cert_path.display(),
            host = self.hostname(),
            ip = detect_lan_ip(),
        );

        Err(HandoffError::CertificateMissing {
            key_path: self.key_path.display().to_string(),
            cert_path: self.cert_path.display().to_string(),
            remediation,
        })
    }
}

/// Build a rustls server config from PEM files
pub fn load_tls_config(key_path: &Path, cert_path: &Path) -> Result<ServerConfig> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| HandoffError::Config(format!("invalid certificate {}: {}", cert_path.display(), e)))?;
    if certs.is_empty() {
        return Err(HandoffError::Config(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))
            .map_err(|e| HandoffError::Config(format!("invalid key {}: {}", key_path.display(), e)))?
            .ok_or_else(|| {
                HandoffError::Config(format!("no private key found in {}", key_path.display()))
            })?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| HandoffError::Config(format!("TLS setup failed: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| HandoffError::Config(format!("certificate rejected: {}", e)))
}

#[async_trait]
impl Reachability for SecureBind {
    fn kind(&self) -> TransportKind {
        TransportKind::Secure
    }

    async fn start(&mut self, state: Arc<AppState>) -> Result<ReachabilityDescriptor> {
        self.check_certificates()?;
        let tls = load_tls_config(&self.key_path, &self.cert_path)?;
        let acceptor = TlsAcceptor::from(Arc::new(tls));

        let plain = bind_all(self.port).await?;
        let secure = bind_all(self.secure_port).await?;
        let plain_addr = plain.local_addr()?;
        let secure_addr = secure.local_addr()?;

        let base_url = format!("https://{}:{}{}", self.hostname(), secure_addr.port(), SECURE_PATH);

        let mut listeners = Listeners::new();
        let (plain_shutdown, tls_shutdown) = (listeners.subscribe(), listeners.subscribe());
        listeners.push(tokio::spawn(server::serve(plain, Arc::clone(&state), plain_shutdown)));
        listeners.push(tokio::spawn(server::serve_tls(secure, acceptor, state, tls_shutdown)));
        self.listeners = Some(listeners);

        info!("HTTP listening on {}", plain_addr);
        info!("HTTPS listening on {}", secure_addr);
        info!("Open on phone: {}", base_url);

        Ok(ReachabilityDescriptor {
            base_url,
            transport: TransportKind::Secure,
            local_addrs: vec![plain_addr, secure_addr],
        })
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(listeners) = self.listeners.take() {
            listeners.shutdown().await;
        }
        Ok(())
    }
}
