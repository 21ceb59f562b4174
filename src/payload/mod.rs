//! Payload building
//!
//! Turns compiled contract output into the unsigned [`PendingPayload`] the
//! wallet will sign. Compilation itself happens elsewhere (Hardhat, Foundry);
//! this only reads the result.

use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::config::Args;
use crate::types::{is_hex_quantity, HandoffError, PendingPayload, Result};

/// Source of the unsigned payload for a handshake
pub trait PayloadBuilder: Send + Sync {
    fn build(&self) -> Result<PendingPayload>;
}

/// A payload that is already fully formed
pub struct StaticPayload(pub PendingPayload);

impl PayloadBuilder for StaticPayload {
    fn build(&self) -> Result<PendingPayload> {
        Ok(self.0.clone())
    }
}

/// Where the init code or calldata comes from
#[derive(Debug, Clone)]
pub enum CodeSource {
    /// Hex string given directly
    Inline(String),
    /// Compiled artifact JSON on disk
    Artifact(PathBuf),
}

/// Contract deployment (or call, when `to` is set) built from compiled output
#[derive(Debug, Clone)]
pub struct ContractPayload {
    pub code: CodeSource,
    /// ABI-encoded constructor arguments, appended to the init code
    pub constructor_args: Option<String>,
    pub to: Option<String>,
    pub chain_id: u64,
    pub value: String,
}

impl ContractPayload {
    pub fn from_args(args: &Args) -> Result<Self> {
        let code = match (&args.artifact, &args.bytecode) {
            (Some(path), _) => CodeSource::Artifact(path.clone()),
            (None, Some(hex)) => CodeSource::Inline(hex.clone()),
            (None, None) => {
                return Err(HandoffError::Config(
                    "either --artifact or --bytecode is required".to_string(),
                ))
            }
        };
        Ok(Self {
            code,
            constructor_args: args.constructor_args.clone(),
            to: args.to.clone(),
            chain_id: args.chain_id,
            value: args.value.clone(),
        })
    }

    fn code_hex(&self) -> Result<String> {
        match &self.code {
            CodeSource::Inline(hex) => Ok(hex.clone()),
            CodeSource::Artifact(path) => read_artifact_bytecode(path),
        }
    }
}

impl PayloadBuilder for ContractPayload {
    fn build(&self) -> Result<PendingPayload> {
        let code = self.code_hex()?;
        if !is_hex_quantity(&code) {
            return Err(HandoffError::Payload(
                "bytecode must be non-empty 0x-prefixed hex".to_string(),
            ));
        }

        let mut data = code;
        if let Some(ctor) = &self.constructor_args {
            let digits = ctor.trim_start_matches("0x");
            hex::decode(digits).map_err(|e| {
                HandoffError::Payload(format!("constructor args are not hex: {}", e))
            })?;
            data.push_str(digits);
        }

        if let Some(to) = &self.to {
            let digits = to.strip_prefix("0x").unwrap_or("");
            if digits.len() != 40 || hex::decode(digits).is_err() {
                return Err(HandoffError::Payload(format!("invalid destination address {:?}", to)));
            }
        }

        if !is_hex_quantity(&self.value) {
            return Err(HandoffError::Payload(format!(
                "value must be a 0x-prefixed hex quantity, got {:?}",
                self.value
            )));
        }

        let payload = PendingPayload {
            to: self.to.clone(),
            data,
            chain_id: self.chain_id,
            value: self.value.clone(),
        };
        info!(
            deployment = payload.is_deployment(),
            chain_id = payload.chain_id,
            data_bytes = (payload.data.len() - 2) / 2,
            "Built unsigned payload"
        );
        Ok(payload)
    }
}

/// Read `bytecode` from a Hardhat (`"bytecode": "0x.."`) or Foundry
/// (`"bytecode": {"object": "0x.."}`) artifact
fn read_artifact_bytecode(path: &Path) -> Result<String> {
    let raw = std::fs::read(path).map_err(|e| {
        HandoffError::Payload(format!("cannot read artifact {}: {}", path.display(), e))
    })?;
    let json: JsonValue = serde_json::from_slice(&raw).map_err(|e| {
        HandoffError::Payload(format!("artifact {} is not JSON: {}", path.display(), e))
    })?;

    let bytecode = match json.get("bytecode") {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Object(obj)) => obj
            .get("object")
            .and_then(|o| o.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                HandoffError::Payload(format!("{}: bytecode.object missing", path.display()))
            })?,
        _ => {
            return Err(HandoffError::Payload(format!(
                "{}: no bytecode field",
                path.display()
            )))
        }
    };

    debug!(path = %path.display(), "Loaded contract artifact");
    if bytecode.starts_with("0x") {
        Ok(bytecode)
    } else {
        Ok(format!("0x{}", bytecode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(code: &str) -> ContractPayload {
        ContractPayload {
            code: CodeSource::Inline(code.to_string()),
            constructor_args: None,
            to: None,
            chain_id: 11155111,
            value: "0x0".to_string(),
        }
    }

    #[test]
    fn test_inline_deployment() {
        let payload = inline("0xabc").build().unwrap();
        assert_eq!(payload, PendingPayload::deployment("0xabc", 11155111));
    }

    #[test]
    fn test_constructor_args_are_appended() {
        let owner = format!("{}{}", "0".repeat(24), "a".repeat(40));
        let mut builder = inline("0x6080");
        builder.constructor_args = Some(format!("0x{}", owner));
        let payload = builder.build().unwrap();
        assert_eq!(payload.data, format!("0x6080{}", owner));
    }

    #[test]
    fn test_hardhat_and_foundry_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let hardhat = dir.path().join("MyToken.json");
        std::fs::write(&hardhat, r#"{"contractName":"MyToken","bytecode":"0x6080"}"#).unwrap();
        let foundry = dir.path().join("Forge.json");
        std::fs::write(&foundry, r#"{"bytecode":{"object":"6080"}}"#).unwrap();

        for path in [hardhat, foundry] {
            let builder = ContractPayload {
                code: CodeSource::Artifact(path),
                ..inline("0x00")
            };
            assert_eq!(builder.build().unwrap().data, "0x6080");
        }
    }

    #[test]
    fn test_invalid_inputs_are_payload_errors() {
        assert!(matches!(inline("6080").build(), Err(HandoffError::Payload(_))));

        let mut bad_to = inline("0x6080");
        bad_to.to = Some("0x1234".to_string());
        assert!(matches!(bad_to.build(), Err(HandoffError::Payload(_))));

        let missing = ContractPayload {
            code: CodeSource::Artifact(PathBuf::from("/definitely/not/here.json")),
            ..inline("0x00")
        };
        assert!(matches!(missing.build(), Err(HandoffError::Payload(_))));
    }
}
