//! Indexed chunk records and their metadata

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Chunk variant; figure chunks carry asset backlinks that text chunks
/// never have, so the fields live on the variant rather than as nullable
/// columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "chunk_type", rename_all = "snake_case")]
pub enum ChunkKind {
    Text,
    Figure {
        figure_id: String,
        /// Asset path relative to the assets root
        image_ref: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_chunk_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_chunk_local_index: Option<usize>,
    },
}

impl ChunkKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Figure { .. } => "figure",
        }
    }

    pub fn is_figure(&self) -> bool {
        matches!(self, Self::Figure { .. })
    }
}

impl Default for ChunkKind {
    fn default() -> Self {
        Self::Text
    }
}

/// Optional chunk metadata; absent fields are omitted from the stored JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_sha256: Option<String>,
}

/// One row of a physical index. Written once by an ingest job and
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    /// Origin path or URI
    pub source: String,
    #[serde(flatten)]
    pub kind: ChunkKind,
    #[serde(flatten)]
    pub meta: ChunkMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_norm: Option<String>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    /// Metadata JSON persisted alongside the row (everything except the
    /// embedding, which has its own column).
    pub fn metadata_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(map) = value.as_object_mut() {
            map.remove("text");
        }
        value
    }
}

/// Zero-padded monotonic chunk id within a document.
pub fn chunk_id(doc_id: &str, ordinal: usize) -> String {
    format!("{}_chunk_{:04}", doc_id, ordinal)
}

/// Figure chunk ids incorporate the figure id instead of an ordinal.
pub fn figure_chunk_id(doc_id: &str, figure_id: &str) -> String {
    format!("{}_chunk_{}", doc_id, figure_id)
}

/// Dedupe hash: SHA-256 of the lowercased, trimmed text.
pub fn hash_norm(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Dedupe hash over the text exactly as stored, for deployments that
/// disable hash normalization.
pub fn hash_raw(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
