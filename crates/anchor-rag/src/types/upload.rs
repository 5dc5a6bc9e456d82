//! Staged upload records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A staged upload awaiting ingestion. The absolute path never leaves the
/// process; API consumers see the relative `storage_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub upload_id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub source: String,
    pub tags: Vec<String>,
    pub lang_hint: String,
    pub storage_path: String,
    pub checksum_sha256: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub abs_path: PathBuf,
}
