//! Handshake session lifecycle

use serde::{Deserialize, Serialize};

/// Where a handshake session is in its lifecycle.
///
/// ```text
/// Created ──▶ Published ──▶ Signed ──▶ Finalizing ──▶ Completed
///    │            │            │            │
///    └────────────┴────────────┴────────────┴──▶ Failed
///    └────────────┴──▶ Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session allocated, payload not yet published
    Created,
    /// Payload available to the signing device
    Published,
    /// Signed artifact received
    Signed,
    /// Settlement id known, waiting for the ledger
    Finalizing,
    /// Ledger confirmed inclusion
    Completed,
    /// Handshake aborted
    Failed,
    /// Deadline elapsed before a signature arrived
    Expired,
}

impl SessionState {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Whether the remote device may still submit a signature
    pub fn accepts_signature(&self) -> bool {
        matches!(self, Self::Published)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Published => 1,
            Self::Signed => 2,
            Self::Finalizing => 3,
            Self::Completed | Self::Failed | Self::Expired => 4,
        }
    }

    /// Forward-only transition check.
    ///
    /// Expiry is only reachable before a signature exists; once the wallet
    /// has signed, the outcome is either Completed or Failed.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Expired => matches!(self, Self::Created | Self::Published),
            _ => next.rank() == self.rank() + 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Published => "published",
            Self::Signed => "signed",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
