use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use kute_api::auth::{self, AppState, AppStateInner};
use kute_api::middleware::require_auth;
use kute_api::{matches, messages, photos, users};
use kute_gateway::connection;
use kute_gateway::dispatcher::Dispatcher;
use kute_vibe::VibeClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kute=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("KUTE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("KUTE_DB_PATH").unwrap_or_else(|_| "kute.db".into());
    let upload_dir =
        PathBuf::from(std::env::var("KUTE_UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()));
    let host = std::env::var("KUTE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("KUTE_PORT")
        .unwrap_or_else(|_| "5000".into())
        .parse()?;
    let gemini_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| "unset".into());

    // Init database and photo storage
    let db = Arc::new(kute_db::Database::open(&PathBuf::from(&db_path))?);
    tokio::fs::create_dir_all(&upload_dir).await?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        vibe: VibeClient::new(gemini_key),
        upload_dir: upload_dir.clone(),
    });

    // Routes
    let public_routes = Router::new()
        .route("/users/register", post(auth::register))
        .route("/users/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::discovery_feed))
        .route(
            "/users/{id}",
            put(users::update_user).delete(users::delete_user),
        )
        .route("/users/{id}/freeze", put(users::toggle_freeze))
        .route("/users/{id}/photos", post(photos::upload_photo))
        .route("/users/{id}/photos/{index}", delete(photos::delete_photo))
        .route("/users/block/{id}", post(users::block_user))
        .route("/matches/like", post(matches::like))
        .route("/matches/nope", post(matches::nope))
        .route("/matches/interacted/{id}", get(matches::interacted))
        // GET takes a user id, DELETE a match id — same slot, role depends
        // on the verb, mirroring the mobile client's API.
        .route(
            "/matches/{id}",
            get(matches::matched_list).delete(matches::unmatch),
        )
        .route("/messages/{match_id}", get(messages::list_messages))
        .route("/messages/{match_id}/seen", post(messages::mark_seen))
        .route("/messages/{match_id}/analyze", post(messages::analyze))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(DefaultBodyLimit::max(6 * 1024 * 1024))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(public_routes)
                .merge(protected_routes)
                .merge(ws_route),
        )
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Kute server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    let jwt_secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db, jwt_secret))
}
