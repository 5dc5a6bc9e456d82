//! POST /uploads and GET /uploads/{id}

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::UploadRecord;

/// Multipart upload: `file` is required; `source`, `tags` and
/// `lang_hint` are optional form fields.
pub async fn create_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadRecord>)> {
    let mut filename: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut source: Option<String> = None;
    let mut tags: Option<String> = None;
    let mut lang_hint: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                filename = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::bad_request(format!("cannot read file field: {}", e)))?;
                bytes = Some(data.to_vec());
            }
            "source" => source = Some(read_text_field(field).await?),
            "tags" => tags = Some(read_text_field(field).await?),
            "lang_hint" => lang_hint = Some(read_text_field(field).await?),
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| Error::EmptyPayload("no file provided".to_string()))?;
    let record = state.uploads().save_upload(
        filename.as_deref(),
        &bytes,
        source.as_deref(),
        tags.as_deref(),
        lang_hint.as_deref(),
    )?;

    tracing::info!(
        "staged upload {} ({} bytes, {})",
        record.upload_id,
        record.size_bytes,
        record.content_type
    );
    Ok((StatusCode::CREATED, Json(record)))
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| Error::bad_request(format!("cannot read form field: {}", e)))
}

pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<UploadRecord>> {
    state
        .uploads()
        .get(&upload_id)
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("upload {}", upload_id)))
}
