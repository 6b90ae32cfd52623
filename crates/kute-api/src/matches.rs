use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use kute_db::matches::{LikeOutcome, NopeOutcome};
use kute_types::api::{Claims, LikeRequest, LikeResponse, MatchSummary, NopeResponse};

use crate::auth::AppState;
use crate::error::ApiError;

/// POST /api/matches/like
pub async fn like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<LikeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_pair(&claims, req.from_user_id, req.to_user_id)?;

    let outcome = state
        .db
        .like(&req.from_user_id.to_string(), &req.to_user_id.to_string())?;

    let (status, body) = match outcome {
        LikeOutcome::Matched(record) => {
            info!("mutual match between {} and {}", record.users[0], record.users[1]);
            (
                StatusCode::OK,
                LikeResponse {
                    matched: true,
                    match_record: Some(record),
                    like: None,
                },
            )
        }
        LikeOutcome::Pending(record) => (
            StatusCode::CREATED,
            LikeResponse {
                matched: false,
                match_record: None,
                like: Some(record),
            },
        ),
    };
    Ok((status, Json(body)))
}

/// POST /api/matches/nope
pub async fn nope(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<LikeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_pair(&claims, req.from_user_id, req.to_user_id)?;

    let outcome = state
        .db
        .nope(&req.from_user_id.to_string(), &req.to_user_id.to_string())?;

    let (status, existing) = match outcome {
        NopeOutcome::Recorded(_) => (StatusCode::CREATED, false),
        NopeOutcome::AlreadyRecorded => (StatusCode::OK, true),
    };
    Ok((
        status,
        Json(NopeResponse {
            rejected: true,
            existing,
        }),
    ))
}

/// GET /api/matches/interacted/{userId} — the discovery suppression list.
pub async fn interacted(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Uuid>>, ApiError> {
    if user_id != claims.sub {
        return Err(ApiError::forbidden("Not your suppression list."));
    }
    let ids = state.db.interacted_ids(&user_id.to_string())?;
    Ok(Json(ids))
}

/// GET /api/matches/{userId} — matched list with last-message summaries,
/// most recently active first.
pub async fn matched_list(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MatchSummary>>, ApiError> {
    if user_id != claims.sub {
        return Err(ApiError::forbidden("Not your match list."));
    }

    // Summaries touch several tables per match; keep it off the async runtime.
    let db = state.clone();
    let summaries = tokio::task::spawn_blocking(move || {
        db.db.matched_with_summaries(&user_id.to_string())
    })
    .await
    .map_err(|e| ApiError::internal(format!("spawn_blocking join error: {}", e)))??;

    Ok(Json(summaries))
}

/// DELETE /api/matches/{matchId} — unmatch.
pub async fn unmatch(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let id = match_id.to_string();
    if !state.db.is_match_participant(&id, &claims.sub.to_string())? {
        return Err(ApiError::not_found("Match not found."));
    }

    state.db.delete_match(&id)?;
    info!("{} ({}) unmatched {}", claims.name, claims.sub, match_id);
    Ok(Json(serde_json::json!({ "message": "Unmatched successfully." })))
}

fn validate_pair(claims: &Claims, from: Uuid, to: Uuid) -> Result<(), ApiError> {
    if from != claims.sub {
        return Err(ApiError::forbidden(
            "fromUserId must be the authenticated user.",
        ));
    }
    if from == to {
        return Err(ApiError::bad_request("You cannot act on yourself."));
    }
    Ok(())
}
