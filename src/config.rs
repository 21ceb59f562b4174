//! Configuration for Handoff
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::types::{HandoffError, Result};

/// Path prefix for plain-HTTP access on the local network
pub const DEV_PATH: &str = "/dev-wallet";

/// Path prefix for TLS or tunneled access
pub const SECURE_PATH: &str = "/secure-wallet";

/// Handoff - get a transaction signed by a phone wallet
#[derive(Parser, Debug, Clone)]
#[command(name = "handoff")]
#[command(about = "Relay an unsigned transaction to a phone wallet and wait for the signature")]
pub struct Args {
    /// How the phone reaches this machine
    #[arg(long, env = "HANDOFF_STRATEGY", value_enum, default_value_t = Strategy::Local)]
    pub strategy: Strategy,

    /// Plain HTTP port
    #[arg(long, env = "HANDOFF_PORT", default_value = "3000")]
    pub port: u16,

    /// TLS port (secure strategy only)
    #[arg(long, env = "HANDOFF_SECURE_PORT", default_value = "3001")]
    pub secure_port: u16,

    /// Host to advertise in the QR code instead of the detected LAN address
    #[arg(long, env = "HANDOFF_PUBLIC_HOST")]
    pub public_host: Option<String>,

    /// Directory holding key.pem and cert.pem (secure strategy)
    #[arg(long, env = "HANDOFF_CERT_DIR", default_value = "certs")]
    pub cert_dir: PathBuf,

    /// Directory for the signed-artifact marker and the QR image
    #[arg(long, env = "HANDOFF_STATE_DIR", default_value = ".handoff")]
    pub state_dir: PathBuf,

    /// JSON-RPC endpoint of the target network
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,

    /// Target chain id (Sepolia by default)
    #[arg(long, env = "CHAIN_ID", default_value = "11155111")]
    pub chain_id: u64,

    /// Compiled contract artifact (JSON with a `bytecode` field)
    #[arg(long, env = "HANDOFF_ARTIFACT", conflicts_with = "bytecode")]
    pub artifact: Option<PathBuf>,

    /// Raw init code or calldata, 0x-prefixed hex
    #[arg(long, env = "HANDOFF_BYTECODE")]
    pub bytecode: Option<String>,

    /// ABI-encoded constructor arguments appended to the init code
    #[arg(long, env = "HANDOFF_CONSTRUCTOR_ARGS")]
    pub constructor_args: Option<String>,

    /// Destination address; omit to deploy a contract
    #[arg(long, env = "HANDOFF_TO")]
    pub to: Option<String>,

    /// Value in wei, 0x-prefixed hex
    #[arg(long, env = "HANDOFF_VALUE", default_value = "0x0")]
    pub value: String,

    /// Block explorer base URL for manual lookups
    #[arg(long, env = "EXPLORER_URL")]
    pub explorer_url: Option<String>,

    /// Tunnel relay host (localtunnel protocol)
    #[arg(long, env = "TUNNEL_HOST", default_value = "https://localtunnel.me")]
    pub tunnel_host: String,

    /// Tunnel attempts before giving up
    #[arg(long, env = "TUNNEL_ATTEMPTS", default_value = "3")]
    pub tunnel_attempts: u32,

    /// Fixed delay between tunnel attempts in milliseconds
    #[arg(long, env = "TUNNEL_BACKOFF_MS", default_value = "1000")]
    pub tunnel_backoff_ms: u64,

    /// How often to check for the signed artifact, in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// How long to wait for the wallet to sign
    #[arg(long, env = "SIGNATURE_TIMEOUT_SECS", default_value = "600")]
    pub signature_timeout_secs: u64,

    /// How long to wait for the ledger to include the transaction
    #[arg(long, env = "FINALIZATION_TIMEOUT_SECS", default_value = "300")]
    pub finalization_timeout_secs: u64,

    /// Skip the eth_chainId sanity check at startup
    #[arg(long, env = "SKIP_CHAIN_CHECK", default_value = "false")]
    pub skip_chain_check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

/// Reachability strategy, fixed for the lifetime of a run
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Plain HTTP on the local network
    Local,
    /// Plain HTTP plus a TLS listener using pre-provisioned certificates
    Secure,
    /// Plain HTTP exposed through a public forwarding tunnel
    Tunnel,
}

impl Args {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn signature_timeout(&self) -> Duration {
        Duration::from_secs(self.signature_timeout_secs)
    }

    pub fn finalization_timeout(&self) -> Duration {
        Duration::from_secs(self.finalization_timeout_secs)
    }

    pub fn tunnel_backoff(&self) -> Duration {
        Duration::from_millis(self.tunnel_backoff_ms)
    }

    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join("key.pem")
    }

    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join("cert.pem")
    }

    /// Explorer base URL, explicit or derived from the chain id
    pub fn explorer_base(&self) -> String {
        self.explorer_url
            .clone()
            .unwrap_or_else(|| default_explorer(self.chain_id).to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.rpc_url)
            .map_err(|e| HandoffError::Config(format!("invalid RPC_URL {:?}: {}", self.rpc_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HandoffError::Config(format!(
                "RPC_URL must be http(s), got {}",
                url.scheme()
            )));
        }

        if self.chain_id == 0 {
            return Err(HandoffError::Config("CHAIN_ID must be non-zero".to_string()));
        }

        if self.artifact.is_none() && self.bytecode.is_none() {
            return Err(HandoffError::Config(
                "either --artifact or --bytecode is required".to_string(),
            ));
        }

        if self.tunnel_attempts == 0 {
            return Err(HandoffError::Config("TUNNEL_ATTEMPTS must be at least 1".to_string()));
        }

        if self.poll_interval_ms == 0 {
            return Err(HandoffError::Config("POLL_INTERVAL_MS must be non-zero".to_string()));
        }

        if self.strategy == Strategy::Secure && self.port == self.secure_port {
            return Err(HandoffError::Config(
                "HANDOFF_PORT and HANDOFF_SECURE_PORT must differ".to_string(),
            ));
        }

        if let Some(host) = &self.public_host {
            if host.contains('/') || host.is_empty() {
                return Err(HandoffError::Config(format!("invalid public host {:?}", host)));
            }
        }

        Ok(())
    }
}

/// Etherscan-family explorer for well-known chains
pub fn default_explorer(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "https://etherscan.io",
        11155111 => "https://sepolia.etherscan.io",
        17000 => "https://holesky.etherscan.io",
        137 => "https://polygonscan.com",
        8453 => "https://basescan.org",
        _ => "https://blockscan.com",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["handoff", "--rpc-url", "https://rpc.sepolia.org", "--bytecode", "0x6080"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.strategy, Strategy::Local);
        assert_eq!(args.port, 3000);
        assert_eq!(args.secure_port, 3001);
        assert_eq!(args.chain_id, 11155111);
        assert_eq!(args.tunnel_attempts, 3);
        assert_eq!(args.poll_interval(), Duration::from_secs(1));
        assert_eq!(args.explorer_base(), "https://sepolia.etherscan.io");
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_invalid_rpc_url_is_config_error() {
        let args = Args::try_parse_from([
            "handoff", "--rpc-url", "not a url", "--bytecode", "0x00",
        ])
        .unwrap();
        assert!(matches!(args.validate(), Err(HandoffError::Config(_))));
    }

    #[test]
    fn test_payload_source_required() {
        let args = Args::try_parse_from(["handoff", "--rpc-url", "http://localhost:8545"]).unwrap();
        assert!(matches!(args.validate(), Err(HandoffError::Config(_))));
    }

    #[test]
    fn test_explorer_override_trims_slash() {
        let args = parse(&["--explorer-url", "https://explorer.example/"]);
        assert_eq!(args.explorer_base(), "https://explorer.example");
    }

    #[test]
    fn test_secure_ports_must_differ() {
        let args = parse(&["--strategy", "secure", "--port", "4000", "--secure-port", "4000"]);
        assert!(args.validate().is_err());
    }
}
