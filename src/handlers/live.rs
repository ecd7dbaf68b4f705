//! Start, stop and inspect the live voice session.

use crate::health::metrics_json;
use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

/// `POST /api/v1/live/start`
///
/// Returns 202 as soon as the session task is spawned; connection progress is
/// visible through `/api/v1/live/status` and `/ws/live`.
pub async fn start_live_session(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let session_id = state.live.start(&config)?;
    info!(session_id = %session_id, "Live session requested over HTTP");

    Ok(HttpResponse::Accepted().json(json!({
        "session_id": session_id,
        "status": state.live_status(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// `POST /api/v1/live/stop`. Always succeeds, even with nothing running.
pub async fn stop_live_session(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let status = state.live.stop();

    Ok(HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn live_status(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": state.live_status(),
        "metrics": metrics_json(&state.live_metrics()),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
