//! HTTP routes for Handoff

pub mod exchange;
pub mod health;
pub mod ui;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::HandoffError;

pub use exchange::{get_qr, get_transaction, post_signed, session_status, SessionQuery};
pub use health::{health_check, version_info};
pub use ui::signing_page;

/// JSON response with permissive CORS, as the wallet page may be served from
/// a different origin than the API (tunnel vs LAN)
pub fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(&body)
        .unwrap_or_else(|_| r#"{"error":"Serialization failed"}"#.to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Map an error to its status code and a JSON body
pub fn error_response(err: &HandoffError) -> Response<Full<Bytes>> {
    json_response(err.status_code(), serde_json::json!({ "error": err.to_string() }))
}

/// CORS preflight response
pub fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        serde_json::json!({
            "error": "Not Found",
            "path": path,
            "hint": "Use /transaction, /signed or /qr under /dev-wallet or /secure-wallet"
        }),
    )
}
