//! Handshake sessions
//!
//! Sessions replace a single global "current transaction" slot with a keyed
//! registry, so several handshakes can be in flight without stepping on each
//! other. The marker file is the cross-process signal that a signature came in.

pub mod marker;
pub mod state;
pub mod store;

pub use marker::MarkerFile;
pub use state::SessionState;
pub use store::{ArtifactStore, Session, SessionSummary, StoreStats};
