//! Ledger access
//!
//! The handshake only needs two things from the network: submit signed bytes,
//! and wait until a transaction is included. [`LedgerClient`] is that seam;
//! [`RpcLedgerClient`] implements it over Ethereum JSON-RPC and
//! [`MockLedger`] stands in for it in tests.

pub mod mock;
pub mod rpc;
pub mod watcher;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Result;

pub use mock::MockLedger;
pub use rpc::RpcLedgerClient;
pub use watcher::{FinalStatus, FinalizationWatcher};

/// Transaction receipt, as returned by `eth_getTransactionReceipt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    /// Set for contract-creation transactions
    #[serde(default)]
    pub contract_address: Option<String>,
    /// `0x1` success, `0x0` reverted; absent on pre-Byzantium chains
    #[serde(default)]
    pub status: Option<String>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_deref() != Some("0x0")
    }

    /// Block number as an integer, when present and well-formed
    pub fn block(&self) -> Option<u64> {
        self.block_number
            .as_deref()
            .and_then(|b| b.strip_prefix("0x"))
            .and_then(|b| u64::from_str_radix(b, 16).ok())
    }
}

/// Operations the handshake needs from the target network
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Chain id reported by the endpoint
    async fn chain_id(&self) -> Result<u64>;

    /// Broadcast a signed raw transaction, returning its hash
    async fn send_raw_transaction(&self, raw: &str) -> Result<String>;

    /// Block until the transaction is included or `timeout` elapses
    async fn wait_for_transaction(&self, tx_hash: &str, timeout: Duration) -> Result<Receipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_status_and_block() {
        let receipt: Receipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0xdeadbeef",
            "blockNumber": "0x10",
            "contractAddress": null,
            "status": "0x1",
            "gasUsed": "0x5208"
        }))
        .unwrap();
        assert!(receipt.succeeded());
        assert_eq!(receipt.block(), Some(16));
        assert!(receipt.contract_address.is_none());

        let reverted = Receipt {
            status: Some("0x0".into()),
            ..receipt
        };
        assert!(!reverted.succeeded());
    }
}
