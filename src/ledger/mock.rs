//! Mock ledger for testing.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{HandoffError, Result};

use super::{LedgerClient, Receipt};

#[derive(Debug, Clone)]
enum Behavior {
    Finalize { contract_address: Option<String> },
    Revert,
    Fail(String),
}

/// Mock ledger client.
///
/// Records every call so tests can assert on what the handshake asked for.
pub struct MockLedger {
    behavior: Behavior,
    chain_id: u64,
    submitted: Mutex<Vec<String>>,
    waited: Mutex<Vec<String>>,
}

impl MockLedger {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            chain_id: 11155111,
            submitted: Mutex::new(Vec::new()),
            waited: Mutex::new(Vec::new()),
        }
    }

    /// Every wait succeeds, optionally reporting a created contract
    pub fn finalizing(contract_address: Option<&str>) -> Self {
        Self::with_behavior(Behavior::Finalize {
            contract_address: contract_address.map(str::to_string),
        })
    }

    /// Every wait returns a reverted receipt
    pub fn reverting() -> Self {
        Self::with_behavior(Behavior::Revert)
    }

    /// Every wait fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_behavior(Behavior::Fail(message.into()))
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Raw transactions passed to `send_raw_transaction`
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Hashes passed to `wait_for_transaction`
    pub fn waited_for(&self) -> Vec<String> {
        self.waited.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Deterministic fake hash for a raw transaction
    pub fn hash_for(raw: &str) -> String {
        let digits = raw.trim_start_matches("0x");
        format!("0x{:0>64}", &digits[..digits.len().min(64)])
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn send_raw_transaction(&self, raw: &str) -> Result<String> {
        if let Behavior::Fail(message) = &self.behavior {
            return Err(HandoffError::Ledger(message.clone()));
        }
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(raw.to_string());
        }
        Ok(Self::hash_for(raw))
    }

    async fn wait_for_transaction(&self, tx_hash: &str, _timeout: Duration) -> Result<Receipt> {
        if let Ok(mut waited) = self.waited.lock() {
            waited.push(tx_hash.to_string());
        }
        match &self.behavior {
            Behavior::Finalize { contract_address } => Ok(Receipt {
                transaction_hash: tx_hash.to_string(),
                block_number: Some("0x1".to_string()),
                contract_address: contract_address.clone(),
                status: Some("0x1".to_string()),
            }),
            Behavior::Revert => Ok(Receipt {
                transaction_hash: tx_hash.to_string(),
                block_number: Some("0x1".to_string()),
                contract_address: None,
                status: Some("0x0".to_string()),
            }),
            Behavior::Fail(message) => Err(HandoffError::Ledger(message.clone())),
        }
    }
}
