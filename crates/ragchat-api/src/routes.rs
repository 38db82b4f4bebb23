//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression, per-user
//! rate limiting, and the session endpoints behind the auth middleware.

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ragchat_core::config::RagChatConfig;
use ragchat_core::error::RagChatError;

use crate::handlers;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;

/// Requests per second allowed for each user.
const RATE_LIMIT_PER_SEC: u64 = 20;
/// Upper bound on one upload batch.
const UPLOAD_BODY_LIMIT: usize = 50 * 1024 * 1024;
/// How often idle sessions and expired index entries are dropped.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

fn cors_layer(config: &RagChatConfig) -> CorsLayer {
    let port = config.general.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
        format!("http://{}:{}", config.general.host, port),
    ]
    .iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    // Routes that do NOT require authentication.
    let public_routes = Router::new().route("/health", get(handlers::health));

    let session_routes = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/sessions/{id}/files",
            post(handlers::upload_files).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/sessions/{id}/mode", post(handlers::set_mode))
        .route("/sessions/{id}/reset", post(handlers::reset))
        .route("/sessions/{id}/messages", get(handlers::messages))
        .route("/sessions/{id}/chat", post(handlers::chat_stream))
        .route("/sessions/{id}/chat/sync", post(handlers::chat_sync))
        .layer(axum::middleware::from_fn(
            crate::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::Extension(RateLimiter::new(RATE_LIMIT_PER_SEC)));

    // Auth runs outside the rate limiter so the limiter sees the identity.
    let protected_routes = session_routes.route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        crate::auth::require_auth,
    ));

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB for JSON bodies
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Periodically drop idle sessions and expired index cache entries.
fn spawn_reaper(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = state.sessions.purge_expired() {
                warn!("session purge failed: {}", e);
            }
            match state.service.index_builder().purge_stale() {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "Expired index cache entries dropped"),
                Err(e) => warn!("index cache purge failed: {}", e),
            }
        }
    });
}

/// Start the HTTP server on the configured address.
pub async fn start_server(state: AppState) -> Result<(), RagChatError> {
    let addr = format!("{}:{}", state.config.general.host, state.config.general.port);

    spawn_reaper(state.clone());
    let router = create_router(state);

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RagChatError::Config(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .await
        .map_err(RagChatError::Io)?;

    Ok(())
}
