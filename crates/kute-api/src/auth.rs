use std::path::PathBuf;
use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use kute_db::Database;
use kute_db::users::NewUser;
use kute_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use kute_vibe::VibeClient;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: kute_gateway::dispatcher::Dispatcher,
    pub vibe: VibeClient,
    pub upload_dir: PathBuf,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    let name = req.name.trim();
    if name.is_empty() || name.len() > 32 {
        return Err(ApiError::bad_request("Name must be 1-32 characters."));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request(
            "Password must be at least 8 characters.",
        ));
    }

    // Check if the name is taken
    if state.db.get_credentials_by_name(name)?.is_some() {
        return Err(ApiError::conflict("That name is already taken."));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::internal(e.to_string()))?
        .to_string();

    let user_id = Uuid::new_v4();
    state.db.create_user(&NewUser {
        id: &user_id.to_string(),
        name,
        password_hash: &password_hash,
        bio: req.bio.as_deref().unwrap_or(""),
        gender: req.gender,
        interested_in: req.interested_in.as_deref().unwrap_or(&[]),
        birth_date: req.birth_date,
        interests: req.interests.as_deref().unwrap_or(&[]),
    })?;

    let token = create_token(&state.jwt_secret, user_id, name)?;
    let user = state
        .db
        .get_profile(&user_id.to_string())?
        .ok_or_else(|| ApiError::internal("Profile vanished after registration."))?;

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let creds = state
        .db
        .get_credentials_by_name(&req.name)?
        .ok_or_else(|| ApiError::not_found("No account with that name."))?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&creds.password).map_err(|e| ApiError::internal(e.to_string()))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthorized("Wrong password."))?;

    let user_id: Uuid = creds
        .id
        .parse()
        .map_err(|_| ApiError::internal("Corrupt user id."))?;
    let token = create_token(&state.jwt_secret, user_id, &creds.name)?;
    let user = state
        .db
        .get_profile(&creds.id)?
        .ok_or_else(|| ApiError::internal("Profile missing for known credentials."))?;

    Ok(Json(AuthResponse { token, user }))
}

pub fn create_token(secret: &str, user_id: Uuid, name: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal(e.to_string()))
}
