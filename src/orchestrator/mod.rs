//! Handshake Orchestrator
//!
//! Drives one session end to end:
//!
//! 1. build the unsigned payload and store it
//! 2. start the reachability strategy and publish the QR code
//! 3. poll the durable marker until the wallet's artifact shows up
//! 4. broadcast raw transactions, then watch the ledger for inclusion
//!
//! Every failure lands the session in a terminal state and is reported in the
//! returned [`HandshakeOutcome`]; the reachability strategy is always stopped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::ledger::{FinalStatus, FinalizationWatcher, LedgerClient};
use crate::payload::PayloadBuilder;
use crate::publish::{render_terminal, QrPublisher};
use crate::reach::Reachability;
use crate::server::AppState;
use crate::session::SessionState;
use crate::types::{HandoffError, Result, SignedArtifact};

/// Timing and output settings for a handshake
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    /// Deadline for the wallet to sign, measured from session creation
    pub signature_timeout: Duration,
    pub finalization_timeout: Duration,
    pub explorer_base: String,
    /// Where the QR image is written
    pub qr_dir: PathBuf,
    /// Print the QR code to stdout as well
    pub print_qr: bool,
}

impl OrchestratorConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            poll_interval: args.poll_interval(),
            signature_timeout: args.signature_timeout(),
            finalization_timeout: args.finalization_timeout(),
            explorer_base: args.explorer_base(),
            qr_dir: args.state_dir.clone(),
            print_qr: true,
        }
    }
}

/// What happened to a handshake
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeOutcome {
    pub session_id: String,
    pub state: SessionState,
    pub base_url: Option<String>,
    pub settlement_id: Option<String>,
    pub contract_address: Option<String>,
    pub lookup_url: Option<String>,
    pub error: Option<String>,
}

impl HandshakeOutcome {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: SessionState::Created,
            base_url: None,
            settlement_id: None,
            contract_address: None,
            lookup_url: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == SessionState::Completed
    }
}

pub struct Orchestrator {
    state: Arc<AppState>,
    reachability: Box<dyn Reachability>,
    ledger: Arc<dyn LedgerClient>,
    watcher: FinalizationWatcher,
    publisher: QrPublisher,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        state: Arc<AppState>,
        reachability: Box<dyn Reachability>,
        ledger: Arc<dyn LedgerClient>,
        config: OrchestratorConfig,
    ) -> Self {
        let watcher = FinalizationWatcher::new(
            Arc::clone(&ledger),
            config.explorer_base.clone(),
            config.finalization_timeout,
        );
        let publisher = QrPublisher::new(config.qr_dir.clone());
        Self {
            state,
            reachability,
            ledger,
            watcher,
            publisher,
            config,
        }
    }

    /// Run one handshake to a terminal state
    pub async fn run(&mut self, builder: &dyn PayloadBuilder) -> HandshakeOutcome {
        let session = self
            .state
            .store
            .create_session_with_ttl(self.config.signature_timeout);
        let session_id = session.session_id;
        let mut outcome = HandshakeOutcome::new(&session_id);

        let result = self.drive(&session_id, builder, &mut outcome).await;

        if let Err(e) = self.reachability.stop().await {
            warn!(error = %e, "Failed to stop reachability strategy");
        }

        if let Err(e) = result {
            error!(session = %session_id, error = %e, "Handshake failed");
            self.fail(&session_id, &e);
            if let HandoffError::Finalization { lookup_url, .. } = &e {
                outcome.lookup_url.get_or_insert_with(|| lookup_url.clone());
            }
            outcome.error = Some(e.to_string());
        }

        outcome.state = self
            .state
            .store
            .get(&session_id)
            .map(|s| s.state)
            .unwrap_or(SessionState::Failed);
        self.state.store.release(&session_id);
        info!(session = %session_id, state = %outcome.state, "Handshake finished");
        outcome
    }

    async fn drive(
        &mut self,
        session_id: &str,
        builder: &dyn PayloadBuilder,
        outcome: &mut HandshakeOutcome,
    ) -> Result<()> {
        let store = Arc::clone(&self.state.store);

        store.put(session_id, builder.build()?)?;

        info!(session = %session_id, transport = ?self.reachability.kind(), "Starting reachability");
        let descriptor = self.reachability.start(Arc::clone(&self.state)).await?;
        outcome.base_url = Some(descriptor.base_url.clone());
        store.advance(session_id, SessionState::Published)?;

        let image = self.publisher.publish(&descriptor.base_url).await?;
        store.set_qr(session_id, image.png)?;
        if self.config.print_qr {
            match render_terminal(&descriptor.base_url) {
                Ok(qr) => println!("\n{}", qr),
                Err(e) => warn!(error = %e, "Could not render terminal QR code"),
            }
            println!("Scan the QR code or open {} on your phone", descriptor.base_url);
        }

        let artifact = self.await_signature(session_id).await?;
        self.state.marker.consume(session_id).await?;
        store.advance(session_id, SessionState::Signed)?;

        let settlement_id = match artifact.settlement_id() {
            Some(hash) => hash.to_string(),
            None => self.broadcast(&artifact).await?,
        };
        store.set_settlement(session_id, &settlement_id)?;
        outcome.settlement_id = Some(settlement_id.clone());
        store.advance(session_id, SessionState::Finalizing)?;

        match self.watcher.await_finalization(&settlement_id).await {
            FinalStatus::Finalized { receipt, lookup_url } => {
                outcome.contract_address = receipt.contract_address;
                outcome.lookup_url = Some(lookup_url);
                store.advance(session_id, SessionState::Completed)?;
                Ok(())
            }
            FinalStatus::Reverted { lookup_url, .. } => Err(HandoffError::Finalization {
                settlement_id,
                lookup_url,
                reason: "transaction reverted".to_string(),
            }),
            FinalStatus::Failed { error, lookup_url, .. } => Err(HandoffError::Finalization {
                settlement_id,
                lookup_url,
                reason: error,
            }),
        }
    }

    /// Poll the marker until it appears, the session expires or the path to
    /// the phone goes away
    async fn await_signature(&self, session_id: &str) -> Result<SignedArtifact> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            session = %session_id,
            timeout_secs = self.config.signature_timeout.as_secs(),
            "Waiting for signature"
        );

        loop {
            ticker.tick().await;

            if let Some(artifact) = self.state.marker.read(session_id).await? {
                info!(session = %session_id, "Signed artifact picked up");
                return Ok(artifact);
            }
            if !self.reachability.is_alive() {
                return Err(HandoffError::Reachability(
                    "connection to the phone was lost before a signature arrived".to_string(),
                ));
            }
            // Another handshake's sweep may have expired this session, and a
            // session stuck in Signed without a marker never gets swept
            self.state.store.expire_stale();
            let expired = self
                .state
                .store
                .get(session_id)
                .map_or(true, |s| s.state == SessionState::Expired || s.is_expired());
            if expired {
                return Err(HandoffError::Expired(format!(
                    "no signature within {:?}",
                    self.config.signature_timeout
                )));
            }
            debug!(session = %session_id, "No signature yet");
        }
    }

    async fn broadcast(&self, artifact: &SignedArtifact) -> Result<String> {
        match artifact {
            SignedArtifact::RawTransaction { raw_transaction } => {
                info!("Broadcasting signed raw transaction");
                self.ledger.send_raw_transaction(raw_transaction).await
            }
            SignedArtifact::TxHash { .. } => Err(HandoffError::Internal(
                "artifact already carries a transaction hash".to_string(),
            )),
        }
    }

    /// Move the session to Expired or Failed, whichever the error means
    fn fail(&self, session_id: &str, err: &HandoffError) {
        let store = &self.state.store;
        let current = match store.get(session_id) {
            Some(s) => s.state,
            None => return,
        };
        if current.is_terminal() {
            return;
        }

        let terminal = match err {
            HandoffError::Expired(_) if current.can_transition_to(SessionState::Expired) => {
                SessionState::Expired
            }
            _ => SessionState::Failed,
        };
        if let Err(e) = store.terminate(session_id, terminal, &err.to_string()) {
            warn!(session = %session_id, error = %e, "Could not record terminal state");
        }
    }
}

/// Make sure the RPC endpoint serves the chain the payload targets
pub async fn check_chain(ledger: &dyn LedgerClient, expected: u64) -> Result<()> {
    let actual = ledger.chain_id().await?;
    if actual != expected {
        return Err(HandoffError::Config(format!(
            "RPC endpoint reports chain {} but {} was configured",
            actual, expected
        )));
    }
    info!(chain_id = actual, "RPC endpoint chain verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedger;
    use crate::payload::StaticPayload;
    use crate::reach::{ReachabilityDescriptor, TransportKind};
    use crate::session::{ArtifactStore, MarkerFile};
    use crate::types::PendingPayload;
    use async_trait::async_trait;

    /// Reachability that binds nothing
    struct NoopReach {
        stopped: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl Reachability for NoopReach {
        fn kind(&self) -> TransportKind {
            TransportKind::Plain
        }

        async fn start(&mut self, _state: Arc<AppState>) -> Result<ReachabilityDescriptor> {
            Ok(ReachabilityDescriptor {
                base_url: "http://192.0.2.1:3000/dev-wallet".to_string(),
                transport: TransportKind::Plain,
                local_addrs: Vec::new(),
            })
        }

        async fn stop(&mut self) -> Result<()> {
            self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        state: Arc<AppState>,
        stopped: Arc<std::sync::atomic::AtomicBool>,
        orchestrator: Orchestrator,
    }

    fn harness(ledger: Arc<MockLedger>, signature_timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(
            Arc::new(ArtifactStore::default()),
            MarkerFile::new(dir.path()),
        ));
        let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let orchestrator = orchestrator_on(
            &state,
            dir.path(),
            Duration::from_millis(10),
            signature_timeout,
            ledger,
            Arc::clone(&stopped),
        );
        Harness {
            _dir: dir,
            state,
            stopped,
            orchestrator,
        }
    }

    fn orchestrator_on(
        state: &Arc<AppState>,
        dir: &std::path::Path,
        poll_interval: Duration,
        signature_timeout: Duration,
        ledger: Arc<MockLedger>,
        stopped: Arc<std::sync::atomic::AtomicBool>,
    ) -> Orchestrator {
        let config = OrchestratorConfig {
            poll_interval,
            signature_timeout,
            finalization_timeout: Duration::from_secs(1),
            explorer_base: "https://sepolia.etherscan.io".to_string(),
            qr_dir: dir.to_path_buf(),
            print_qr: false,
        };
        Orchestrator::new(Arc::clone(state), Box::new(NoopReach { stopped }), ledger, config)
    }

    /// Write the marker as soon as the session is published
    fn sign_when_published(state: Arc<AppState>, artifact: SignedArtifact) {
        tokio::spawn(async move {
            loop {
                if let Some(session) = state.store.current() {
                    if session.state == SessionState::Published {
                        state.marker.write(&session.session_id, &artifact).await.unwrap();
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
    }

    fn payload() -> StaticPayload {
        StaticPayload(PendingPayload::deployment("0x6080", 11155111))
    }

    #[tokio::test]
    async fn test_raw_transaction_is_broadcast_then_finalized() {
        let ledger = Arc::new(MockLedger::finalizing(Some("0x1234")));
        let mut h = harness(ledger.clone(), Duration::from_secs(5));
        let raw = "0x02f86b0102";
        sign_when_published(
            Arc::clone(&h.state),
            SignedArtifact::RawTransaction {
                raw_transaction: raw.to_string(),
            },
        );

        let outcome = h.orchestrator.run(&payload()).await;

        assert!(outcome.succeeded(), "{:?}", outcome.error);
        assert_eq!(ledger.submitted(), vec![raw.to_string()]);
        assert_eq!(outcome.settlement_id, Some(MockLedger::hash_for(raw)));
        assert_eq!(outcome.contract_address.as_deref(), Some("0x1234"));
        assert!(h.stopped.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!h.state.marker.path_for(&outcome.session_id).exists());
    }

    #[tokio::test]
    async fn test_no_signature_expires_session() {
        let ledger = Arc::new(MockLedger::finalizing(None));
        let mut h = harness(ledger.clone(), Duration::from_millis(50));

        let outcome = h.orchestrator.run(&payload()).await;

        assert_eq!(outcome.state, SessionState::Expired);
        assert!(outcome.error.unwrap().contains("no signature within 50ms"));
        assert!(ledger.waited_for().is_empty());
        assert!(h.stopped.load(std::sync::atomic::Ordering::SeqCst));

        // Nothing bulky is kept for a finished session
        let session = h.state.store.get(&outcome.session_id).unwrap();
        assert!(session.payload.is_none());
        assert!(session.qr_png.is_none());
    }

    #[tokio::test]
    async fn test_session_expired_by_another_sweep_still_ends() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(
            Arc::new(ArtifactStore::default()),
            MarkerFile::new(dir.path()),
        ));
        let ledger = Arc::new(MockLedger::finalizing(None));
        let fast_stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let slow_stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));

        // Polls often, so its sweeps expire the other session first
        let mut long_lived = orchestrator_on(
            &state,
            dir.path(),
            Duration::from_millis(10),
            Duration::from_secs(1),
            ledger.clone(),
            Arc::clone(&fast_stopped),
        );
        let mut short_lived = orchestrator_on(
            &state,
            dir.path(),
            Duration::from_millis(500),
            Duration::from_millis(100),
            ledger,
            Arc::clone(&slow_stopped),
        );

        let payload_a = payload();
        let payload_b = payload();
        let (a, b) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(3), long_lived.run(&payload_a)),
            tokio::time::timeout(Duration::from_secs(3), short_lived.run(&payload_b)),
        );

        assert_eq!(a.unwrap().state, SessionState::Expired);
        let b = b.expect("short-lived handshake must end at its deadline");
        assert_eq!(b.state, SessionState::Expired);
        assert!(slow_stopped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_signed_session_without_marker_still_times_out() {
        let mut h = harness(Arc::new(MockLedger::finalizing(None)), Duration::from_millis(200));

        // Leave the store Signed with no marker on disk
        let state = Arc::clone(&h.state);
        tokio::spawn(async move {
            loop {
                if let Some(session) = state.store.current() {
                    if session.state == SessionState::Published {
                        state
                            .store
                            .put_signed(&session.session_id, SignedArtifact::tx_hash("0x01"))
                            .unwrap();
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let outcome = tokio::time::timeout(Duration::from_secs(3), h.orchestrator.run(&payload()))
            .await
            .expect("handshake must end at its deadline");

        assert_eq!(outcome.state, SessionState::Failed);
        assert!(outcome.error.unwrap().contains("no signature"));
        assert!(h.stopped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reverted_transaction_fails_with_lookup() {
        let ledger = Arc::new(MockLedger::reverting());
        let mut h = harness(ledger, Duration::from_secs(5));
        sign_when_published(Arc::clone(&h.state), SignedArtifact::tx_hash("0xdeadbeef"));

        let outcome = h.orchestrator.run(&payload()).await;

        assert_eq!(outcome.state, SessionState::Failed);
        assert_eq!(outcome.settlement_id.as_deref(), Some("0xdeadbeef"));
        assert_eq!(
            outcome.lookup_url.as_deref(),
            Some("https://sepolia.etherscan.io/tx/0xdeadbeef")
        );
        assert!(outcome.error.unwrap().contains("reverted"));
    }

    #[tokio::test]
    async fn test_builder_error_fails_before_publishing() {
        struct Broken;
        impl PayloadBuilder for Broken {
            fn build(&self) -> Result<PendingPayload> {
                Err(HandoffError::Payload("artifact has no bytecode".to_string()))
            }
        }

        let mut h = harness(Arc::new(MockLedger::finalizing(None)), Duration::from_secs(1));
        let outcome = h.orchestrator.run(&Broken).await;

        assert_eq!(outcome.state, SessionState::Failed);
        assert!(outcome.base_url.is_none());
        let session = h.state.store.get(&outcome.session_id).unwrap();
        assert_eq!(session.history, vec![SessionState::Created, SessionState::Failed]);
    }

    #[tokio::test]
    async fn test_chain_mismatch_is_config_error() {
        let ledger = MockLedger::finalizing(None).with_chain_id(1);
        assert!(check_chain(&ledger, 1).await.is_ok());
        assert!(matches!(
            check_chain(&ledger, 11155111).await,
            Err(HandoffError::Config(_))
        ));
    }
}
