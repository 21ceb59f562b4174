//! Handoff - two-device signing relay
//!
//! Hands an unsigned transaction to a phone wallet and waits for it to come
//! back signed. The laptop builds the payload, serves it over HTTP, shows a QR
//! code pointing at itself, and once the wallet posts the signed artifact
//! watches the ledger until the transaction is included.
//!
//! The phone can reach the laptop three ways (see [`reach`]): plain HTTP on the
//! LAN, HTTPS with operator-provided certificates, or a public tunnel.

pub mod config;
pub mod ledger;
pub mod orchestrator;
pub mod payload;
pub mod publish;
pub mod reach;
pub mod routes;
pub mod server;
pub mod session;
pub mod types;

pub use config::Args;
pub use orchestrator::{HandshakeOutcome, Orchestrator, OrchestratorConfig};
pub use server::AppState;
pub use types::{HandoffError, Result};
