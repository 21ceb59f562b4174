//! Artifact Store
//!
//! In-memory registry of handshake sessions keyed by session token. Each
//! session holds one pending payload and at most one signed artifact.
//! Nothing here is persisted: a restart drops every pending session.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::types::{HandoffError, PendingPayload, Result, SignedArtifact};

use super::state::SessionState;

/// A single two-device handshake
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque session token (`sess_<uuid>`)
    pub session_id: String,

    pub state: SessionState,

    /// Unsigned transaction, written once before publication
    pub payload: Option<PendingPayload>,

    /// First signed artifact received; immutable once set
    pub signed: Option<SignedArtifact>,

    /// Transaction hash tracked on the ledger
    pub settlement_id: Option<String>,

    /// Rendered QR code for the endpoint's base URL
    pub qr_png: Option<Bytes>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Every state the session has been in, oldest first
    pub history: Vec<SessionState>,

    /// Failure reason for Failed/Expired sessions
    pub error: Option<String>,
}

impl Session {
    pub fn new(session_id: String, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        Self {
            session_id,
            state: SessionState::Created,
            payload: None,
            signed: None,
            settlement_id: None,
            qr_png: None,
            created_at: now,
            expires_at: now + ttl,
            history: vec![SessionState::Created],
            error: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Remaining time before expiry, zero when past due
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or_default()
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(HandoffError::StateConflict(format!(
                "session {} cannot move from {} to {}",
                self.session_id, self.state, next
            )));
        }
        debug!(session = %self.session_id, from = %self.state, to = %next, "Session transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

/// Serializable view of a session for the status route
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub state: SessionState,
    pub has_payload: bool,
    pub signed: bool,
    pub settlement_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Seconds left before an unsigned session expires
    pub remaining_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            state: session.state,
            has_payload: session.payload.is_some(),
            signed: session.signed.is_some(),
            settlement_id: session.settlement_id.clone(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            remaining_secs: session.remaining().as_secs(),
            error: session.error.clone(),
        }
    }
}

/// Keyed in-memory session registry
pub struct ArtifactStore {
    sessions: DashMap<String, Session>,
    default_ttl: Duration,
}

impl ArtifactStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            default_ttl,
        }
    }

    /// Allocate a fresh session with the default TTL
    pub fn create_session(&self) -> Session {
        self.create_session_with_ttl(self.default_ttl)
    }

    pub fn create_session_with_ttl(&self, ttl: Duration) -> Session {
        let session_id = format!("sess_{}", uuid::Uuid::new_v4());
        let session = Session::new(session_id.clone(), ttl);
        self.sessions.insert(session_id.clone(), session.clone());
        info!(session = %session_id, ttl_secs = ttl.as_secs(), "Created handshake session");
        session
    }

    /// Store the unsigned payload for a session.
    ///
    /// Creates the session if the key is unknown. Fails with `StateConflict`
    /// when the session already carries a payload.
    pub fn put(&self, session_id: &str, payload: PendingPayload) -> Result<()> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                if session.payload.is_some() {
                    return Err(HandoffError::StateConflict(format!(
                        "session {} already has a payload",
                        session_id
                    )));
                }
                if session.state.is_terminal() {
                    return Err(HandoffError::StateConflict(format!(
                        "session {} is {}",
                        session_id, session.state
                    )));
                }
                session.payload = Some(payload);
            }
            Entry::Vacant(entry) => {
                let mut session = Session::new(session_id.to_string(), self.default_ttl);
                session.payload = Some(payload);
                entry.insert(session);
            }
        }
        debug!(session = %session_id, "Stored pending payload");
        Ok(())
    }

    pub fn get_pending(&self, session_id: &str) -> Result<PendingPayload> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.payload.clone())
            .ok_or_else(|| HandoffError::NotFound(format!("no pending payload for {}", session_id)))
    }

    /// Record the signed artifact. The first submission wins; any later one
    /// fails with `StateConflict` and leaves the stored artifact untouched.
    pub fn put_signed(&self, session_id: &str, artifact: SignedArtifact) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| HandoffError::NotFound(format!("unknown session {}", session_id)))?;

        if session.signed.is_some() {
            warn!(session = %session_id, "Rejected duplicate signed artifact");
            return Err(HandoffError::StateConflict(format!(
                "session {} already has a signed artifact",
                session_id
            )));
        }
        if session.payload.is_none() {
            return Err(HandoffError::NotFound(format!(
                "session {} has no pending payload",
                session_id
            )));
        }
        if !session.state.accepts_signature() {
            return Err(HandoffError::StateConflict(format!(
                "session {} is {}, not awaiting a signature",
                session_id, session.state
            )));
        }

        session.transition(SessionState::Signed)?;
        session.signed = Some(artifact);
        info!(session = %session_id, "Signed artifact stored");
        Ok(())
    }

    pub fn get_signed(&self, session_id: &str) -> Result<SignedArtifact> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.signed.clone())
            .ok_or_else(|| HandoffError::NotFound(format!("no signed artifact for {}", session_id)))
    }

    /// Move a session forward. Re-entering the current state is a no-op;
    /// anything backwards fails with `StateConflict`.
    pub fn advance(&self, session_id: &str, next: SessionState) -> Result<SessionState> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| HandoffError::NotFound(format!("unknown session {}", session_id)))?;
        session.transition(next)?;
        Ok(session.state)
    }

    /// Mark a session Failed (or Expired) with a reason
    pub fn terminate(&self, session_id: &str, state: SessionState, reason: &str) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| HandoffError::NotFound(format!("unknown session {}", session_id)))?;
        session.transition(state)?;
        session.error = Some(reason.to_string());
        Ok(())
    }

    /// Settlement id is written once
    pub fn set_settlement(&self, session_id: &str, settlement_id: &str) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| HandoffError::NotFound(format!("unknown session {}", session_id)))?;
        match &session.settlement_id {
            Some(existing) if existing != settlement_id => Err(HandoffError::StateConflict(
                format!("session {} already settled as {}", session_id, existing),
            )),
            _ => {
                session.settlement_id = Some(settlement_id.to_string());
                Ok(())
            }
        }
    }

    pub fn set_qr(&self, session_id: &str, png: Bytes) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| HandoffError::NotFound(format!("unknown session {}", session_id)))?;
        session.qr_png = Some(png);
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Most recently created live session that has a payload.
    ///
    /// Used when the signing device does not name a session.
    pub fn current(&self) -> Option<Session> {
        self.sessions
            .iter()
            .filter(|s| !s.state.is_terminal() && s.payload.is_some())
            .max_by_key(|s| s.created_at)
            .map(|s| s.clone())
    }

    /// Look up by explicit key, falling back to the current session
    pub fn resolve(&self, session_id: Option<&str>) -> Result<Session> {
        match session_id {
            Some(id) => self
                .get(id)
                .ok_or_else(|| HandoffError::NotFound(format!("unknown session {}", id))),
            None => self
                .current()
                .ok_or_else(|| HandoffError::NotFound("No transaction available".to_string())),
        }
    }

    /// Flag every unsigned session past its deadline as Expired
    pub fn expire_stale(&self) -> Vec<String> {
        let mut expired = Vec::new();
        for mut session in self.sessions.iter_mut() {
            if session.is_expired()
                && session.state.can_transition_to(SessionState::Expired)
                && session.transition(SessionState::Expired).is_ok()
            {
                session.error = Some("signature deadline elapsed".to_string());
                expired.push(session.session_id.clone());
            }
        }
        if !expired.is_empty() {
            info!("Expired {} stale session(s)", expired.len());
        }
        expired
    }

    /// Undo a `put_signed` whose durable marker could not be written, so
    /// the wallet can retry
    pub fn rollback_signed(&self, session_id: &str) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| HandoffError::NotFound(format!("unknown session {}", session_id)))?;
        if session.state != SessionState::Signed || session.signed.is_none() {
            return Err(HandoffError::StateConflict(format!(
                "session {} is {}, nothing to roll back",
                session_id, session.state
            )));
        }
        session.signed = None;
        session.state = SessionState::Published;
        session.history.pop();
        warn!(session = %session_id, "Signed artifact rolled back");
        Ok(())
    }

    /// Drop the bulky parts of a finished session; the summary stays for
    /// the status route
    pub fn release(&self, session_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.payload = None;
            session.qr_png = None;
            debug!(session = %session_id, state = %session.state, "Released session data");
        }
    }

    pub fn stats(&self) -> StoreStats {
        let total = self.sessions.len();
        let active = self.sessions.iter().filter(|s| !s.state.is_terminal()).count();
        StoreStats {
            total_sessions: total,
            active_sessions: active,
            finished_sessions: total - active,
        }
    }
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

/// Store statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub finished_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn published(store: &ArtifactStore) -> String {
        let session = store.create_session();
        store
            .put(&session.session_id, PendingPayload::deployment("0xabc", 11155111))
            .unwrap();
        store
            .advance(&session.session_id, SessionState::Published)
            .unwrap();
        session.session_id
    }

    #[test]
    fn test_second_put_signed_conflicts_and_keeps_first() {
        let store = ArtifactStore::default();
        let id = published(&store);

        store
            .put_signed(&id, SignedArtifact::tx_hash("0xdeadbeef"))
            .unwrap();
        let err = store
            .put_signed(&id, SignedArtifact::tx_hash("0xfeedface"))
            .unwrap_err();

        assert!(matches!(err, HandoffError::StateConflict(_)));
        assert_eq!(
            store.get_signed(&id).unwrap(),
            SignedArtifact::tx_hash("0xdeadbeef")
        );
        assert_eq!(store.get(&id).unwrap().state, SessionState::Signed);
    }

    #[test]
    fn test_rollback_reopens_session_for_signature() {
        let store = ArtifactStore::default();
        let id = published(&store);
        store.put_signed(&id, SignedArtifact::tx_hash("0x01")).unwrap();

        store.rollback_signed(&id).unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.state, SessionState::Published);
        assert!(session.signed.is_none());
        assert_eq!(session.history, vec![SessionState::Created, SessionState::Published]);
        store.put_signed(&id, SignedArtifact::tx_hash("0x02")).unwrap();
        assert_eq!(store.get_signed(&id).unwrap(), SignedArtifact::tx_hash("0x02"));

        // Only a Signed session can be rolled back
        let fresh = published(&store);
        assert!(matches!(
            store.rollback_signed(&fresh),
            Err(HandoffError::StateConflict(_))
        ));
    }

    #[test]
    fn test_release_drops_payload_and_qr() {
        let store = ArtifactStore::default();
        let id = published(&store);
        store.set_qr(&id, Bytes::from_static(b"png")).unwrap();
        store.terminate(&id, SessionState::Failed, "test").unwrap();

        store.release(&id);

        let session = store.get(&id).unwrap();
        assert!(session.payload.is_none());
        assert!(session.qr_png.is_none());
        assert_eq!(session.state, SessionState::Failed);
    }

    #[test]
    fn test_put_is_single_shot() {
        let store = ArtifactStore::default();
        let id = published(&store);
        let err = store
            .put(&id, PendingPayload::deployment("0xdef", 1))
            .unwrap_err();
        assert!(matches!(err, HandoffError::StateConflict(_)));
        assert_eq!(store.get_pending(&id).unwrap().data, "0xabc");
    }

    #[test]
    fn test_put_creates_unknown_session() {
        let store = ArtifactStore::default();
        store
            .put("sess_manual", PendingPayload::deployment("0xabc", 1))
            .unwrap();
        assert_eq!(store.get("sess_manual").unwrap().state, SessionState::Created);
    }

    #[test]
    fn test_missing_lookups_are_not_found() {
        let store = ArtifactStore::default();
        assert!(matches!(store.get_pending("nope"), Err(HandoffError::NotFound(_))));
        assert!(matches!(store.get_signed("nope"), Err(HandoffError::NotFound(_))));
        assert!(matches!(store.resolve(None), Err(HandoffError::NotFound(_))));
    }

    #[test]
    fn test_advance_rejects_regression() {
        let store = ArtifactStore::default();
        let id = published(&store);
        store.put_signed(&id, SignedArtifact::tx_hash("0x01")).unwrap();

        // Re-entering the same state is fine
        assert_eq!(store.advance(&id, SessionState::Signed).unwrap(), SessionState::Signed);
        assert!(store.advance(&id, SessionState::Published).is_err());

        let session = store.get(&id).unwrap();
        assert_eq!(
            session.history,
            vec![SessionState::Created, SessionState::Published, SessionState::Signed]
        );
    }

    #[test]
    fn test_current_prefers_newest_live_session() {
        let store = ArtifactStore::default();
        let first = published(&store);
        std::thread::sleep(Duration::from_millis(5));
        let second = published(&store);

        assert_eq!(store.current().unwrap().session_id, second);

        store
            .terminate(&second, SessionState::Failed, "test")
            .unwrap();
        assert_eq!(store.current().unwrap().session_id, first);
    }

    #[test]
    fn test_expire_stale_only_touches_unsigned_sessions() {
        let store = ArtifactStore::new(Duration::from_millis(0));
        let unsigned = published(&store);
        let signed = published(&store);
        store.put_signed(&signed, SignedArtifact::tx_hash("0x01")).unwrap();

        let expired = store.expire_stale();

        assert_eq!(expired, vec![unsigned.clone()]);
        assert_eq!(store.get(&unsigned).unwrap().state, SessionState::Expired);
        assert_eq!(store.get(&signed).unwrap().state, SessionState::Signed);
        assert!(store.put_signed(&unsigned, SignedArtifact::tx_hash("0x02")).is_err());
    }

    #[test]
    fn test_settlement_written_once() {
        let store = ArtifactStore::default();
        let id = published(&store);
        store.set_settlement(&id, "0xdeadbeef").unwrap();
        store.set_settlement(&id, "0xdeadbeef").unwrap();
        assert!(store.set_settlement(&id, "0xother").is_err());
    }
}
