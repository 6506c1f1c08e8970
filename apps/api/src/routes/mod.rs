pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::screening::handlers;
use crate::state::AppState;

/// Upper bound on one multipart upload (a ZIP of resumes fits comfortably).
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Screening API
        .route("/api/v1/screenings", post(handlers::handle_screen_batch))
        .route(
            "/api/v1/screenings/analyze",
            post(handlers::handle_analyze),
        )
        .route(
            "/api/v1/screenings/:session_id",
            get(handlers::handle_get_session).delete(handlers::handle_delete_session),
        )
        .route(
            "/api/v1/screenings/:session_id/export",
            get(handlers::handle_export),
        )
        // Credits API
        .route("/api/v1/credits", get(handlers::handle_get_credits))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}
