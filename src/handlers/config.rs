use crate::config::AppConfig;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Public view of the configuration. The API key is reported only as present
/// or absent.
fn config_json(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "live": {
            "endpoint": config.live.endpoint,
            "model": config.live.model,
            "voice_name": config.live.voice_name,
            "system_instruction": config.live.system_instruction,
            "api_key_configured": !config.live.api_key.trim().is_empty()
        },
        "audio": {
            "capture_sample_rate": config.audio.capture_sample_rate,
            "playback_sample_rate": config.audio.playback_sample_rate,
            "capture_block_size": config.audio.capture_block_size
        },
        "host": {
            "capture_file": config.host.capture_file,
            "recording_dir": config.host.recording_dir,
            "max_recording_secs": config.host.max_recording_secs
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_json(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state.update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_json(&current_config)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    fn app_state() -> web::Data<AppState> {
        let mut config = AppConfig::default();
        config.live.api_key = "top-secret".to_string();
        web::Data::new(AppState::new(config))
    }

    #[actix_web::test]
    async fn test_get_config_redacts_api_key() {
        let app = test::init_service(
            App::new()
                .app_data(app_state())
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["config"]["live"]["voice_name"], "Kore");
        assert_eq!(body["config"]["live"]["api_key_configured"], true);
        assert!(!body.to_string().contains("top-secret"));
    }

    #[actix_web::test]
    async fn test_update_config_partial_and_invalid() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"live": {"voice_name": "Puck"}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert_eq!(state.get_config().live.voice_name, "Puck");
        assert_eq!(state.get_config().live.api_key, "top-secret");

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"server": {"port": 0}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config().server.port, 8080);
    }
}
