//! POST /ingest/jobs and GET /ingest/jobs/{id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::jobs::CreateJobRequest;
use crate::server::state::AppState;
use crate::types::JobSnapshot;

/// Create an ingestion job from staged uploads. Returns 202 with the
/// queued snapshot; execution is asynchronous.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobSnapshot>)> {
    let job = state.jobs().create_job(request).await?;
    tracing::info!(
        "queued job {} (profile {}, table {})",
        job.job_id,
        job.profile,
        job.physical_table
    );
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobSnapshot>> {
    state
        .jobs()
        .get_job(job_id)
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("job {}", job_id)))
}
