//! Wire types exchanged with the signing device

use serde::{Deserialize, Serialize};

use super::error::{HandoffError, Result};

/// An unsigned transaction description, ready for the wallet to sign.
///
/// `to = None` (serialized as `null`) means contract creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayload {
    /// Destination address, `None` for contract creation
    pub to: Option<String>,
    /// Calldata or init code, 0x-prefixed hex
    pub data: String,
    /// Target chain (EIP-155 chain id)
    pub chain_id: u64,
    /// Value in wei, 0x-prefixed hex quantity
    pub value: String,
}

impl PendingPayload {
    /// Contract-creation payload with zero value
    pub fn deployment(data: impl Into<String>, chain_id: u64) -> Self {
        Self {
            to: None,
            data: data.into(),
            chain_id,
            value: "0x0".to_string(),
        }
    }

    pub fn is_deployment(&self) -> bool {
        self.to.is_none()
    }
}

/// What the wallet posts back once it has signed.
///
/// Wallets that broadcast themselves send `{ "txHash": ... }`; wallets that
/// only sign send `{ "rawTransaction": ... }` and leave submission to us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignedArtifact {
    TxHash {
        #[serde(rename = "txHash")]
        tx_hash: String,
    },
    RawTransaction {
        #[serde(rename = "rawTransaction")]
        raw_transaction: String,
    },
}

impl SignedArtifact {
    pub fn tx_hash(hash: impl Into<String>) -> Self {
        Self::TxHash {
            tx_hash: hash.into(),
        }
    }

    /// Parse and validate a submission body
    pub fn parse(body: &[u8]) -> Result<Self> {
        let artifact: SignedArtifact = serde_json::from_slice(body)?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Reject empty or non-hex values
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::TxHash { tx_hash } => {
                if !is_hex_quantity(tx_hash) {
                    return Err(HandoffError::InvalidArtifact(format!(
                        "txHash is not 0x-prefixed hex: {:?}",
                        tx_hash
                    )));
                }
            }
            Self::RawTransaction { raw_transaction } => {
                let digits = raw_transaction.strip_prefix("0x").ok_or_else(|| {
                    HandoffError::InvalidArtifact("rawTransaction must be 0x-prefixed".into())
                })?;
                let bytes = hex::decode(digits).map_err(|e| {
                    HandoffError::InvalidArtifact(format!("rawTransaction is not hex: {}", e))
                })?;
                if bytes.is_empty() {
                    return Err(HandoffError::InvalidArtifact("rawTransaction is empty".into()));
                }
            }
        }
        Ok(())
    }

    /// Settlement id when the wallet already broadcast the transaction
    pub fn settlement_id(&self) -> Option<&str> {
        match self {
            Self::TxHash { tx_hash } => Some(tx_hash),
            Self::RawTransaction { .. } => None,
        }
    }
}

/// `0x` followed by at least one hex digit
pub fn is_hex_quantity(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_payload_serializes_null_destination() {
        let payload = PendingPayload::deployment("0xabc", 11155111);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"to": null, "data": "0xabc", "chainId": 11155111, "value": "0x0"})
        );
    }

    #[test]
    fn test_parse_tx_hash_artifact() {
        let artifact = SignedArtifact::parse(br#"{"txHash":"0xdeadbeef"}"#).unwrap();
        assert_eq!(artifact.settlement_id(), Some("0xdeadbeef"));
    }

    #[test]
    fn test_parse_raw_transaction_artifact() {
        let artifact = SignedArtifact::parse(br#"{"rawTransaction":"0x02f8"}"#).unwrap();
        assert!(matches!(artifact, SignedArtifact::RawTransaction { .. }));
        assert_eq!(artifact.settlement_id(), None);
    }

    #[test]
    fn test_parse_rejects_malformed_bodies() {
        for body in [
            &b"not json"[..],
            br#"{"hash":"0xdeadbeef"}"#,
            br#"{"txHash":""}"#,
            br#"{"txHash":"deadbeef"}"#,
            br#"{"txHash":"0xnothex"}"#,
            br#"{"rawTransaction":"0xabc"}"#,
        ] {
            let err = SignedArtifact::parse(body).unwrap_err();
            assert!(matches!(err, HandoffError::InvalidArtifact(_)), "{:?}", err);
        }
    }
}
