//! HTTP routes

pub mod chat;
pub mod health;
pub mod jobs;
pub mod uploads;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build the application router.
pub fn routes(max_upload_bytes: u64) -> Router<AppState> {
    // Leave headroom over the upload cap so the typed too_large error
    // fires instead of a generic body-limit rejection.
    let body_limit = (max_upload_bytes as usize).saturating_mul(2).max(1 << 20);

    Router::new()
        .route("/chat", post(chat::chat))
        .route("/healthz", get(health::healthz))
        .route(
            "/uploads",
            post(uploads::create_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/uploads/:id", get(uploads::get_upload))
        .route("/ingest/jobs", post(jobs::create_job))
        .route("/ingest/jobs/:id", get(jobs::get_job))
}
