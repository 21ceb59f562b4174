//! Exchange routes: the three operations the signing device talks to
//!
//! - `GET /transaction` - the pending unsigned payload
//! - `POST /signed` - the wallet's signed artifact (first submission wins)
//! - `GET /qr`, `GET /server-qr.png` - the rendered QR code
//!
//! Each accepts `?session=<token>`; without it the newest live session is used.

use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::server::AppState;
use crate::session::SessionSummary;
use crate::types::{HandoffError, SignedArtifact};

use super::{error_response, json_response};

/// Largest accepted `POST /signed` body
pub const MAX_SIGNED_BODY: usize = 8 * 1024;

/// Query string accepted by every exchange route
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub session: Option<String>,
}

impl SessionQuery {
    pub fn parse(query: Option<&str>) -> Self {
        query
            .and_then(|q| serde_urlencoded::from_str(q).ok())
            .unwrap_or_default()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitAck {
    success: bool,
    session_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStatusResponse {
    #[serde(flatten)]
    session: SessionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    qr_data_url: Option<String>,
}

fn no_transaction() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        serde_json::json!({ "error": "No transaction available" }),
    )
}

/// Handle GET /transaction
pub fn get_transaction(state: &AppState, query: &SessionQuery) -> Response<Full<Bytes>> {
    let session = match state.store.resolve(query.session.as_deref()) {
        Ok(s) => s,
        Err(_) => {
            info!("Transaction data requested: not available");
            return no_transaction();
        }
    };

    match session.payload {
        Some(payload) if !session.state.is_terminal() => {
            info!(session = %session.session_id, "Transaction data requested: available");
            json_response(StatusCode::OK, payload)
        }
        _ => {
            info!(session = %session.session_id, state = %session.state, "Transaction data requested: not available");
            no_transaction()
        }
    }
}

/// Handle POST /signed
pub async fn post_signed(
    req: Request<Incoming>,
    state: Arc<AppState>,
    query: &SessionQuery,
) -> Response<Full<Bytes>> {
    let body = match Limited::new(req.into_body(), MAX_SIGNED_BODY).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Rejected unreadable signed artifact body");
            return error_response(&HandoffError::InvalidArtifact(format!(
                "request body unreadable or larger than {} bytes: {}",
                MAX_SIGNED_BODY, e
            )));
        }
    };

    let artifact = match SignedArtifact::parse(&body) {
        Ok(a) => a,
        Err(e) => {
            warn!(error = %e, "Rejected malformed signed artifact");
            return error_response(&e);
        }
    };

    let session = match state.store.resolve(query.session.as_deref()) {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };
    let session_id = session.session_id;

    info!(session = %session_id, "Received signed transaction");

    if let Err(e) = state.store.put_signed(&session_id, artifact.clone()) {
        let already_signed = state.store.get_signed(&session_id).is_ok();
        if matches!(e, HandoffError::StateConflict(_)) && already_signed {
            return json_response(
                StatusCode::CONFLICT,
                serde_json::json!({
                    "error": "Transaction already signed",
                    "sessionId": session_id,
                }),
            );
        }
        return error_response(&e);
    }

    if let Err(e) = state.marker.write(&session_id, &artifact).await {
        error!(session = %session_id, error = %e, "Failed to write signed artifact marker");
        if let Err(rollback) = state.store.rollback_signed(&session_id) {
            error!(session = %session_id, error = %rollback, "Rollback after marker failure failed");
        }
        return error_response(&e);
    }

    json_response(
        StatusCode::OK,
        SubmitAck {
            success: true,
            session_id,
        },
    )
}

/// Handle GET /qr and GET /server-qr.png
pub fn get_qr(state: &AppState, query: &SessionQuery) -> Response<Full<Bytes>> {
    let png = state
        .store
        .resolve(query.session.as_deref())
        .ok()
        .and_then(|s| s.qr_png);

    match png {
        Some(png) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "image/png")
            .header("Access-Control-Allow-Origin", "*")
            .header("Cache-Control", "no-store")
            .body(Full::new(png))
            .unwrap(),
        None => json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "QR code not found" }),
        ),
    }
}

/// Handle GET /session
pub fn session_status(state: &AppState, query: &SessionQuery) -> Response<Full<Bytes>> {
    match state.store.resolve(query.session.as_deref()) {
        Ok(session) => {
            let qr_data_url = session.qr_png.as_ref().map(|png| {
                format!(
                    "data:image/png;base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(png)
                )
            });
            json_response(
                StatusCode::OK,
                SessionStatusResponse {
                    session: SessionSummary::from(&session),
                    qr_data_url,
                },
            )
        }
        Err(e) => error_response(&e),
    }
}
