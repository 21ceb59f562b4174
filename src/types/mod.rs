//! Shared types for Handoff

pub mod error;
pub mod payload;

pub use error::{HandoffError, Result};
pub use payload::{is_hex_quantity, PendingPayload, SignedArtifact};
