use crate::live::{LiveMetrics, SessionStatus};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let status = state.live_status();
    let metrics = state.live_metrics();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "live": {
            "state": status.state,
            "session_id": status.session_id,
            "speaking": status.speaking,
            "last_error": status.error,
            "agent": {
                "model": config.live.model,
                "voice": config.live.voice_name,
                "api_key_configured": !config.live.api_key.trim().is_empty()
            }
        },
        "metrics": metrics_json(&metrics),
        "memory": get_memory_info(),
        "system": get_system_status(&status, &metrics)
    }))
}

pub fn metrics_json(metrics: &LiveMetrics) -> serde_json::Value {
    json!({
        "sessions_started": metrics.sessions_started,
        "sessions_failed": metrics.sessions_failed,
        "failure_rate": if metrics.sessions_started > 0 {
            metrics.sessions_failed as f64 / metrics.sessions_started as f64
        } else {
            0.0
        },
        "frames_sent": metrics.frames_sent,
        "frames_received": metrics.frames_received,
        "decode_errors": metrics.decode_errors,
        "interruptions": metrics.interruptions
    })
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let read_kb = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available for pid {} on this platform", process::id())
    })
}

fn get_system_status(status: &SessionStatus, metrics: &LiveMetrics) -> serde_json::Value {
    let mut warnings = Vec::new();
    if status.error.is_some() {
        warnings.push("Last live session ended with an error");
    }
    if metrics.decode_errors > 0 {
        warnings.push("Inbound audio chunks were dropped because they could not be decoded");
    }

    json!({
        "status": if status.state.is_running() { "in_session" } else { "ready" },
        "warnings": warnings
    })
}
