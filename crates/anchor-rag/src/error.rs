//! Error types for the QA backend

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Closed error taxonomy. Every variant maps to a stable wire `type`
/// string; upstream variants carry a transient/permanent flag.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or semantically invalid request input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Uploaded payload had zero bytes
    #[error("Empty payload: {0}")]
    EmptyPayload(String),

    /// Upload exceeded the configured size cap
    #[error("Upload exceeds maximum size of {max_bytes} bytes")]
    TooLarge { max_bytes: u64 },

    /// Sniffed MIME type is not in the allow-list
    #[error("Unsupported MIME type: {0}")]
    UnsupportedMime(String),

    /// Ingest profile is not configured
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// `X-RAG-Domain` names a domain that is not configured
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    /// Upload, job or alias does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An active job already references one of the uploads
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Embedding dimension disagrees with the target table
    #[error("Schema drift on {table}: table dimension {expected}, embedding dimension {actual}")]
    SchemaDrift {
        table: String,
        expected: usize,
        actual: usize,
    },

    /// Embedding service failure
    #[error("Embedding failed: {message}")]
    EmbedFailed { message: String, transient: bool },

    /// Chat model failure
    #[error("LLM failed: {message}")]
    LlmFailed { message: String, transient: bool },

    /// Vector store failure
    #[error("Store failed: {message}")]
    StoreFailed { message: String, transient: bool },

    /// Request-scoped deadline expired
    #[error("Deadline exceeded after {0}s")]
    DeadlineExceeded(u64),

    /// Configuration invalid at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation (bug)
    #[error("Invariant violated: {0}")]
    Internal(String),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn embed_failed(message: impl Into<String>, transient: bool) -> Self {
        Self::EmbedFailed {
            message: message.into(),
            transient,
        }
    }

    pub fn llm_failed(message: impl Into<String>, transient: bool) -> Self {
        Self::LlmFailed {
            message: message.into(),
            transient,
        }
    }

    pub fn store_failed(message: impl Into<String>, transient: bool) -> Self {
        Self::StoreFailed {
            message: message.into(),
            transient,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable wire identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::EmptyPayload(_) => "empty_payload",
            Self::TooLarge { .. } => "too_large",
            Self::UnsupportedMime(_) => "unsupported_mime",
            Self::UnknownProfile(_) => "unknown_profile",
            Self::UnknownDomain(_) => "unknown_domain",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::SchemaDrift { .. } => "schema_drift",
            Self::EmbedFailed { .. } => "embed_failed",
            Self::LlmFailed { .. } => "llm_failed",
            Self::StoreFailed { .. } => "store_failed",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "invariant_violated",
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EmbedFailed { transient, .. }
            | Self::LlmFailed { transient, .. }
            | Self::StoreFailed { transient, .. } => *transient,
            Self::DeadlineExceeded(_) => true,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StoreFailed {
            message: err.to_string(),
            transient: false,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::BadRequest(_) | Error::EmptyPayload(_) | Error::UnknownDomain(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::UnsupportedMime(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::UnknownProfile(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::EmbedFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::LlmFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::SchemaDrift { .. }
            | Error::StoreFailed { .. }
            | Error::Config(_)
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
