use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use kute_types::api::{Claims, UpdateUserRequest, UserProfile};

use crate::auth::AppState;
use crate::discovery;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    50
}

/// GET /api/users — the discovery feed for the authenticated viewer.
pub async fn discovery_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let viewer_id = claims.sub.to_string();
    let limit = query.limit.clamp(1, 200);
    let page = query.page.max(1);

    // Run all blocking DB queries off the async runtime
    let db = state.clone();
    let feed = tokio::task::spawn_blocking(move || {
        let viewer = db
            .db
            .get_profile(&viewer_id)?
            .ok_or_else(|| anyhow::anyhow!("viewer {} not found", viewer_id))?;

        let interacted: HashSet<Uuid> =
            db.db.interacted_ids(&viewer_id)?.into_iter().collect();
        let candidates = db
            .db
            .discovery_candidates(&viewer_id, &viewer.interested_in)?;

        let today = chrono::Utc::now().date_naive();
        Ok::<_, anyhow::Error>(discovery::assemble_feed(
            &viewer, candidates, &interacted, page, limit, today,
        ))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::internal("discovery task failed")
    })??;

    Ok(Json(feed))
}

/// PUT /api/users/{id} — partial profile update, self only.
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(update): Json<UpdateUserRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    ensure_self(&claims, user_id)?;

    if let Some(range) = &update.age_range {
        if range.min < 18 || range.min > range.max {
            return Err(ApiError::bad_request("Invalid age range."));
        }
    }
    if let Some(d) = update.max_distance {
        if !(d > 0.0) {
            return Err(ApiError::bad_request("maxDistance must be positive."));
        }
    }

    let id = user_id.to_string();
    if !state.db.update_user(&id, &update)? {
        return Err(ApiError::not_found("User not found."));
    }
    let profile = state
        .db
        .get_profile(&id)?
        .ok_or_else(|| ApiError::not_found("User not found."))?;
    Ok(Json(profile))
}

/// PUT /api/users/{id}/freeze — toggle the frozen flag.
pub async fn toggle_freeze(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_self(&claims, user_id)?;

    let frozen = state
        .db
        .toggle_frozen(&user_id.to_string())?
        .ok_or_else(|| ApiError::not_found("User not found."))?;
    info!("{} ({}) set frozen = {}", claims.name, claims.sub, frozen);
    Ok(Json(serde_json::json!({ "frozen": frozen })))
}

/// DELETE /api/users/{id} — cascading account delete.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_self(&claims, user_id)?;

    if !state.db.delete_user(&user_id.to_string())? {
        return Err(ApiError::not_found("User not found."));
    }
    info!("{} ({}) deleted their account", claims.name, claims.sub);
    Ok(Json(serde_json::json!({ "message": "Account deleted." })))
}

/// POST /api/users/block/{userId} — block and purge matches with the pair.
pub async fn block_user(
    State(state): State<AppState>,
    Path(blocked_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    if blocked_id == claims.sub {
        return Err(ApiError::bad_request("You cannot block yourself."));
    }

    state
        .db
        .block_user(&claims.sub.to_string(), &blocked_id.to_string())?;
    info!("{} ({}) blocked {}", claims.name, claims.sub, blocked_id);
    Ok(Json(serde_json::json!({ "blocked": blocked_id })))
}

fn ensure_self(claims: &Claims, user_id: Uuid) -> Result<(), ApiError> {
    if claims.sub != user_id {
        return Err(ApiError::forbidden("You can only modify your own profile."));
    }
    Ok(())
}
