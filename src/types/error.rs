//! Error types for Handoff
//!
//! One enum covers the whole handshake. Boundary errors (bad requests,
//! duplicate submissions) map to HTTP responses via [`HandoffError::status_code`];
//! everything else aborts the handshake and is reported to the operator.

use hyper::StatusCode;

/// Main error type for Handoff operations
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS certificate missing (key: {key_path}, cert: {cert_path})\n{remediation}")]
    CertificateMissing {
        key_path: String,
        cert_path: String,
        remediation: String,
    },

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Tunnel unavailable after {attempts} attempt(s): {last_error}")]
    TunnelUnavailable { attempts: u32, last_error: String },

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Finalization failed for {settlement_id}: {reason} (check {lookup_url})")]
    Finalization {
        settlement_id: String,
        lookup_url: String,
        reason: String,
    },

    #[error("Payload build failed: {0}")]
    Payload(String),

    #[error("Reachability error: {0}")]
    Reachability(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Session expired: {0}")]
    Expired(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandoffError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArtifact(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StateConflict(_) => StatusCode::CONFLICT,
            Self::Expired(_) => StatusCode::GONE,
            Self::Ledger(_) | Self::Finalization { .. } => StatusCode::BAD_GATEWAY,
            Self::TunnelUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_)
            | Self::CertificateMissing { .. }
            | Self::Payload(_)
            | Self::Reachability(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for HandoffError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for HandoffError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArtifact(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for HandoffError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<reqwest::Error> for HandoffError {
    fn from(err: reqwest::Error) -> Self {
        Self::Ledger(err.to_string())
    }
}

/// Result type alias for Handoff operations
pub type Result<T> = std::result::Result<T, HandoffError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_errors_map_to_client_statuses() {
        assert_eq!(
            HandoffError::InvalidArtifact("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HandoffError::StateConflict("dup".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            HandoffError::Expired("late".into()).status_code(),
            StatusCode::GONE
        );
    }

    #[test]
    fn test_certificate_missing_message_includes_remediation() {
        let err = HandoffError::CertificateMissing {
            key_path: "certs/key.pem".into(),
            cert_path: "certs/cert.pem".into(),
            remediation: "mkcert -key-file ./certs/key.pem".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let message = err.to_string();
        assert!(message.contains("certs/cert.pem"));
        assert!(message.contains("mkcert"));
    }
}
