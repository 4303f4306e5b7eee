use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_body(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_body(&current_config)
    })))
}

/// The externally visible configuration. The agent API key is environment
/// state, not configuration, and never appears here.
fn config_body(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "agent": {
            "model": config.agent.model,
            "voice": config.agent.voice,
            "live_host": config.agent.live_host,
            "research_model": config.agent.research_model,
            "evaluation_model": config.agent.evaluation_model
        },
        "audio": {
            "transport_rate": config.audio.transport_rate,
            "playback_rate": config.audio.playback_rate,
            "send_unit_samples": config.audio.send_unit_samples,
            "drain_poll_ms": config.audio.drain_poll_ms,
            "first_turn_grace_ms": config.audio.first_turn_grace_ms,
            "turn_grace_ms": config.audio.turn_grace_ms
        },
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions
        }
    })
}
