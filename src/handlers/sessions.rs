//! Session lifecycle routes: listing, status, pairing code, connect and logout.

use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::handlers::{session_for, SessionQuery};
use crate::session::{ConnectOutcome, Session};
use crate::state::AppState;

/// Kick off a connect without waiting for it.
fn connect_in_background(session: &Arc<Session>) {
    let session = session.clone();
    tokio::spawn(async move {
        match session.connect().await {
            Ok(outcome) => debug!(session_id = %session.id(), ?outcome, "Background connect"),
            Err(e) => warn!(session_id = %session.id(), error = %e, "Background connect failed"),
        }
    });
}

pub async fn list_sessions(state: web::Data<AppState>) -> HttpResponse {
    let statuses: Vec<_> = state
        .registry
        .list()
        .iter()
        .filter_map(|id| state.registry.get(id))
        .map(|session| session.status())
        .collect();

    HttpResponse::Ok().json(json!({ "sessions": statuses }))
}

/// Status of the session; also starts connecting it.
pub async fn get_status(
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
) -> AppResult<HttpResponse> {
    let session = session_for(&state, query.id())?;
    connect_in_background(&session);
    Ok(HttpResponse::Ok().json(session.status()))
}

/// The current pairing code, waiting briefly for the first one to arrive.
pub async fn get_qr(
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
) -> AppResult<HttpResponse> {
    let session = session_for(&state, query.id())?;
    connect_in_background(&session);

    let code = session.wait_for_code(state.config.qr_wait()).await;
    let status = session.status();

    Ok(HttpResponse::Ok().json(json!({
        "qr": code.unwrap_or(status.pending_code),
        "paired": status.paired,
        "socket_connected": status.socket_connected
    })))
}

pub async fn connect_session(
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
) -> AppResult<HttpResponse> {
    let session = session_for(&state, query.id())?;
    let outcome = session.connect().await?;

    let message = match outcome {
        ConnectOutcome::Connected => "Connected with stored credentials",
        ConnectOutcome::AwaitingPairing => "Waiting for the pairing code to be scanned",
        ConnectOutcome::AlreadyConnecting => "A connection attempt is already running",
        ConnectOutcome::AlreadyConnected => "Already connected",
    };

    Ok(HttpResponse::Ok().json(json!({
        "outcome": outcome,
        "message": message,
        "status": session.status()
    })))
}

pub async fn logout_session(
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
) -> AppResult<HttpResponse> {
    let session = session_for(&state, query.id())?;
    let was_connected = session.logout().await;

    let body = if was_connected {
        json!({ "success": true, "message": "Account unlinked" })
    } else {
        json!({ "success": false, "error": "Not connected" })
    };
    Ok(HttpResponse::Ok().json(body))
}
