use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use kute_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// 5 MB per photo — the mobile client compresses before upload.
const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;

/// POST /api/users/{id}/photos — multipart upload, appended to the ordered
/// photo list and served statically under /uploads.
pub async fn upload_photo(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    if user_id != claims.sub {
        return Err(ApiError::forbidden("You can only upload your own photos."));
    }

    let mut stored: Option<(String, usize)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("photo") {
            continue;
        }

        let ext = extension_for(field.content_type());
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
        if data.is_empty() {
            return Err(ApiError::bad_request("Empty photo upload."));
        }
        if data.len() > MAX_PHOTO_BYTES {
            return Err(ApiError::bad_request("Photo exceeds the 5 MB limit."));
        }

        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        let path = state.upload_dir.join(&filename);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to store photo: {}", e)))?;

        let url = format!("/uploads/{}", filename);
        let position = state.db.add_photo(&user_id.to_string(), &url)?;
        stored = Some((url, position));
        break;
    }

    let (url, position) =
        stored.ok_or_else(|| ApiError::bad_request("Expected a 'photo' field."))?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "url": url, "position": position })),
    ))
}

/// DELETE /api/users/{id}/photos/{index} — remove by position and compact.
pub async fn delete_photo(
    State(state): State<AppState>,
    Path((user_id, index)): Path<(Uuid, usize)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id != claims.sub {
        return Err(ApiError::forbidden("You can only remove your own photos."));
    }

    let url = state
        .db
        .remove_photo(&user_id.to_string(), index)?
        .ok_or_else(|| ApiError::not_found("No photo at that position."))?;

    // The DB row is authoritative; a leftover file is only disk waste.
    if let Some(filename) = url.strip_prefix("/uploads/") {
        if let Err(e) = tokio::fs::remove_file(state.upload_dir.join(filename)).await {
            warn!("Failed to unlink photo {}: {}", url, e);
        }
    }

    Ok(Json(serde_json::json!({ "removed": url })))
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some("image/jpeg") => "jpg",
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        Some("image/gif") => "gif",
        _ => "bin",
    }
}
