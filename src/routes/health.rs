//! Health check endpoints
//!
//! - /health - liveness plus a session count summary
//! - /version - build information captured by build.rs

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::server::AppState;
use crate::session::StoreStats;

use super::json_response;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Seconds since the endpoint started
    pub uptime: u64,
    pub sessions: StoreStats,
    pub timestamp: String,
}

/// Handle liveness check (/health)
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        sessions: state.store.stats(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    json_response(StatusCode::OK, response)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "handoff",
    };
    json_response(StatusCode::OK, response)
}
