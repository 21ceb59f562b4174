//! Finalization Watcher
//!
//! Waits for a settlement id to be included on the ledger. Errors are not
//! retried here: the signed transaction is already out, so the operator gets
//! the hash and an explorer link to follow up by hand.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::{LedgerClient, Receipt};

/// Outcome of waiting for inclusion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalStatus {
    /// Included and executed successfully
    Finalized { receipt: Receipt, lookup_url: String },
    /// Included but execution reverted
    Reverted { receipt: Receipt, lookup_url: String },
    /// Could not confirm; check the explorer
    Failed {
        settlement_id: String,
        error: String,
        lookup_url: String,
    },
}

impl FinalStatus {
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized { .. })
    }

    pub fn lookup_url(&self) -> &str {
        match self {
            Self::Finalized { lookup_url, .. }
            | Self::Reverted { lookup_url, .. }
            | Self::Failed { lookup_url, .. } => lookup_url,
        }
    }
}

pub struct FinalizationWatcher {
    client: Arc<dyn LedgerClient>,
    explorer_base: String,
    timeout: Duration,
}

impl FinalizationWatcher {
    pub fn new(client: Arc<dyn LedgerClient>, explorer_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            explorer_base: explorer_base.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Explorer link for manual follow-up
    pub fn lookup_url(&self, settlement_id: &str) -> String {
        format!("{}/tx/{}", self.explorer_base, settlement_id)
    }

    pub async fn await_finalization(&self, settlement_id: &str) -> FinalStatus {
        let lookup_url = self.lookup_url(settlement_id);
        info!(tx_hash = %settlement_id, timeout_secs = self.timeout.as_secs(), "Waiting for inclusion");

        match self.client.wait_for_transaction(settlement_id, self.timeout).await {
            Ok(receipt) if receipt.succeeded() => {
                info!(
                    tx_hash = %settlement_id,
                    block = ?receipt.block(),
                    contract = ?receipt.contract_address,
                    "Transaction finalized"
                );
                FinalStatus::Finalized { receipt, lookup_url }
            }
            Ok(receipt) => {
                warn!(tx_hash = %settlement_id, "Transaction reverted");
                FinalStatus::Reverted { receipt, lookup_url }
            }
            Err(e) => {
                warn!(tx_hash = %settlement_id, error = %e, lookup = %lookup_url, "Finalization tracking failed");
                FinalStatus::Failed {
                    settlement_id: settlement_id.to_string(),
                    error: e.to_string(),
                    lookup_url,
                }
            }
        }
    }
}
