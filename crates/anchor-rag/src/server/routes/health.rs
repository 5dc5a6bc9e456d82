//! GET /healthz — always 200; each service reports up or down with a
//! reason.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub services: HealthServices,
}

#[derive(Debug, Serialize)]
pub struct HealthServices {
    pub embeddings: String,
    pub llm_primary: String,
    pub llm_fallback: String,
}

fn report(result: crate::error::Result<()>) -> (bool, String) {
    match result {
        Ok(()) => (true, "up".to_string()),
        Err(e) => (false, format!("down ({})", e)),
    }
}

pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let (embeddings, primary, fallback) = tokio::join!(
        state.embedder().health(),
        state.primary_llm().health(),
        state.fallback_llm().health(),
    );

    let (embeddings_up, embeddings) = report(embeddings);
    let (primary_up, llm_primary) = report(primary);
    let (fallback_up, llm_fallback) = report(fallback);

    Json(HealthResponse {
        ok: embeddings_up && primary_up && fallback_up,
        services: HealthServices {
            embeddings,
            llm_primary,
            llm_fallback,
        },
    })
}
