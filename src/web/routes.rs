use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

const UPLOAD_LIMIT: usize = 256 * 1024 * 1024;

// API Routes - JSON API for chat clients
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Chat entry point
            .route("/chat", post(handlers::api::chat))
            // Conversation management
            .route(
                "/sessions/{id}",
                get(handlers::api::session_history).delete(handlers::api::reset_session),
            )
            // Data sources
            .route("/sources", get(handlers::api::list_sources))
            .route(
                "/upload",
                post(handlers::api::upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
            )
            // System status
            .route("/health", get(handlers::api::health))
            .route("/status", get(handlers::api::system_status)),
    )
}
