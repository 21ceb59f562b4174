//! Ethereum JSON-RPC ledger client

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

use crate::types::{HandoffError, Result};

use super::{LedgerClient, Receipt};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: JsonValue,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC client over HTTP
pub struct RpcLedgerClient {
    http: reqwest::Client,
    url: String,
    receipt_poll_interval: Duration,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_poll_interval(url, Duration::from_secs(4))
    }

    pub fn with_poll_interval(url: impl Into<String>, receipt_poll_interval: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: url.into(),
            receipt_poll_interval,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.http.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(HandoffError::Ledger(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let rpc: RpcResponse = response.json().await?;
        if let Some(err) = rpc.error {
            return Err(HandoffError::Ledger(format!(
                "{} failed ({}): {}",
                method, err.code, err.message
            )));
        }
        Ok(rpc.result)
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        let value = self.call("eth_getTransactionReceipt", json!([tx_hash])).await?;
        if value.is_null() {
            return Ok(None);
        }
        let receipt = serde_json::from_value(value)
            .map_err(|e| HandoffError::Ledger(format!("malformed receipt: {}", e)))?;
        Ok(Some(receipt))
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn chain_id(&self) -> Result<u64> {
        let value = self.call("eth_chainId", json!([])).await?;
        value
            .as_str()
            .and_then(|s| s.strip_prefix("0x"))
            .and_then(|s| u64::from_str_radix(s, 16).ok())
            .ok_or_else(|| HandoffError::Ledger(format!("unexpected eth_chainId result: {}", value)))
    }

    async fn send_raw_transaction(&self, raw: &str) -> Result<String> {
        let value = self.call("eth_sendRawTransaction", json!([raw])).await?;
        let hash = value
            .as_str()
            .ok_or_else(|| HandoffError::Ledger(format!("unexpected tx hash: {}", value)))?
            .to_string();
        info!(tx_hash = %hash, "Raw transaction broadcast");
        Ok(hash)
    }

    async fn wait_for_transaction(&self, tx_hash: &str, timeout: Duration) -> Result<Receipt> {
        let started = Instant::now();
        loop {
            if let Some(receipt) = self.receipt(tx_hash).await? {
                debug!(tx_hash = %tx_hash, block = ?receipt.block(), "Receipt found");
                return Ok(receipt);
            }
            if started.elapsed() + self.receipt_poll_interval > timeout {
                return Err(HandoffError::Ledger(format!(
                    "no receipt for {} after {}s",
                    tx_hash,
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}
