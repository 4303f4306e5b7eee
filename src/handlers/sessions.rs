//! # Session Endpoints
//!
//! HTTP access to ended sessions, primarily the evaluation retry path: when
//! scoring fails after an interview (network, upstream error, rate limit),
//! the transcript stays in the registry and the client retries here instead
//! of silently losing the interview.

use crate::agent::generate::GenerateClient;
use crate::error::{AppError, AppResult};
use crate::interview::session::evaluate_session;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

/// `POST /api/v1/sessions/{session_id}/evaluate` — score (or re-score) an
/// ended session's retained transcript. 429s from the evaluator surface as
/// `rate_limited` so the client can say so.
pub async fn retry_evaluation(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown session '{}'", session_id)))?;

    let config = state.get_config();
    let generate = GenerateClient::new(&config.agent)?;
    let evaluation = evaluate_session(&session, &generate).await?;
    state.interview_evaluated();

    info!(session_id = %session_id, "evaluation retry succeeded");

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session_id,
        "interview_id": session.interview_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "evaluation": evaluation
    })))
}

/// `GET /api/v1/sessions/{session_id}/transcript` — the committed transcript
/// of a session (final once the session has ended).
pub async fn get_transcript(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown session '{}'", session_id)))?;

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session_id,
        "interview_id": session.interview_id,
        "state": session.state().as_str(),
        "speaking": session.is_speaking(),
        "created_at": session.created_at().to_rfc3339(),
        "duration_seconds": session.duration_seconds(),
        "entries": session.transcript_snapshot()
    })))
}
