use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use kute_types::api::{AnalyzeRequest, Claims, MessageResponse};
use kute_vibe::VibeReport;

use crate::auth::AppState;
use crate::error::ApiError;

/// How much history the analysis collaborator gets when the client does not
/// supply its own window.
const ANALYSIS_WINDOW: u32 = 20;

/// GET /api/messages/{matchId} — full history, oldest first. A pure read;
/// the seen-state mutation lives behind its own endpoint below.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    ensure_participant(&state, match_id, claims.sub)?;

    let db = state.clone();
    let messages =
        tokio::task::spawn_blocking(move || db.db.list_messages(&match_id.to_string()))
            .await
            .map_err(|e| ApiError::internal(format!("spawn_blocking join error: {}", e)))??;
    Ok(Json(messages))
}

/// POST /api/messages/{matchId}/seen — mark everything not sent by the caller
/// as seen by them. Idempotent.
pub async fn mark_seen(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_participant(&state, match_id, claims.sub)?;

    let updated = state
        .db
        .mark_seen(&match_id.to_string(), &claims.sub.to_string())?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

/// POST /api/messages/{matchId}/analyze — vibe analysis over a recent window.
/// Collaborator failures come back as the neutral fallback, never an error.
pub async fn analyze(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<VibeReport>, ApiError> {
    ensure_participant(&state, match_id, claims.sub)?;

    let window = match req.messages {
        Some(lines) if !lines.is_empty() => lines,
        _ => {
            let db = state.clone();
            tokio::task::spawn_blocking(move || {
                db.db.recent_chat_lines(&match_id.to_string(), ANALYSIS_WINDOW)
            })
            .await
            .map_err(|e| ApiError::internal(format!("spawn_blocking join error: {}", e)))??
        }
    };

    if window.len() < 2 {
        return Err(ApiError::bad_request("Not enough messages to analyze."));
    }

    let report = state.vibe.analyze(&window).await;
    Ok(Json(report))
}

fn ensure_participant(state: &AppState, match_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
    if !state
        .db
        .is_match_participant(&match_id.to_string(), &user_id.to_string())?
    {
        return Err(ApiError::not_found("Match not found."));
    }
    Ok(())
}
