//! POST /chat

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::time::Duration;

use crate::error::Error;
use crate::server::state::AppState;

pub const DOMAIN_HEADER: &str = "x-rag-domain";
pub const ANSWER_MODE_HEADER: &str = "x-answer-mode";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

/// Answer a question. `X-RAG-Domain` routes retrieval to a domain alias;
/// the response mirrors the chosen mode in `X-Answer-Mode`.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, Error> {
    let domain_key = headers
        .get(DOMAIN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let deadline_secs = state.config().server.request_timeout_secs;
    let answer = tokio::time::timeout(
        Duration::from_secs(deadline_secs),
        state
            .retrieval()
            .answer(&request.question, domain_key.as_deref()),
    )
    .await
    .map_err(|_| Error::DeadlineExceeded(deadline_secs))??;

    let mode = answer.mode.as_str();
    let mut response = Json(answer).into_response();
    response.headers_mut().insert(
        ANSWER_MODE_HEADER,
        HeaderValue::from_str(mode).unwrap_or(HeaderValue::from_static("fallback")),
    );
    Ok(response)
}
