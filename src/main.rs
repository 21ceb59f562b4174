//! Handoff - get a transaction signed by a phone wallet

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use handoff::{
    config::Args,
    ledger::{LedgerClient, RpcLedgerClient},
    orchestrator::{self, Orchestrator, OrchestratorConfig},
    payload::ContractPayload,
    reach,
    session::{ArtifactStore, MarkerFile},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    let json = args.log_json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("handoff={},info", log_level).into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Handoff - two-device signing relay");
    info!("======================================");
    info!("Strategy: {:?}", args.strategy);
    info!("Port: {}", args.port);
    info!("RPC: {}", args.rpc_url);
    info!("Chain: {}", args.chain_id);
    info!("State dir: {}", args.state_dir.display());
    info!("Signature timeout: {}s", args.signature_timeout_secs);
    info!("======================================");

    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedgerClient::new(args.rpc_url.clone()));

    if !args.skip_chain_check {
        if let Err(e) = orchestrator::check_chain(ledger.as_ref(), args.chain_id).await {
            error!("Chain check failed: {}", e);
            std::process::exit(1);
        }
    }

    let builder = match ContractPayload::from_args(&args) {
        Ok(b) => b,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState::new(
        Arc::new(ArtifactStore::new(args.signature_timeout())),
        MarkerFile::new(args.state_dir.clone()),
    ));

    let mut orchestrator = Orchestrator::new(
        state,
        reach::from_args(&args),
        ledger,
        OrchestratorConfig::from_args(&args),
    );

    let outcome = orchestrator.run(&builder).await;

    if let Some(hash) = &outcome.settlement_id {
        println!("Transaction: {}", hash);
    }
    if let Some(address) = &outcome.contract_address {
        println!("Contract deployed at: {}", address);
    }
    if let Some(url) = &outcome.lookup_url {
        println!("Explorer: {}", url);
    }

    if !outcome.succeeded() {
        error!(
            "Handshake ended {}: {}",
            outcome.state,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    info!("Handshake completed");
    Ok(())
}
