//! Upload staging
//!
//! Blobs land under `<staging>/<YYYY>/<MM>/<DD>/<upload_id>/<name>`;
//! metadata lives in `uploads.json` next to the staging tree, written
//! atomically (tmp + rename).

use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::types::UploadRecord;

const ALLOWED_LANG_HINTS: [&str; 4] = ["auto", "es", "en", "pt"];

fn filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap())
}

/// Staging storage for uploaded documents.
pub struct UploadStore {
    base_dir: PathBuf,
    allow_mime: Vec<String>,
    max_upload_bytes: u64,
    records: Mutex<HashMap<String, UploadRecord>>,
    index_path: PathBuf,
}

impl UploadStore {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let base_dir = config.staging_dir.clone();
        std::fs::create_dir_all(&base_dir)?;
        let index_path = base_dir.join("uploads.json");
        let mut records = load_index(&index_path)?;
        // abs_path is never serialized; rebuild it from the relative
        // storage path for records loaded from a previous run.
        for record in records.values_mut() {
            if record.abs_path.as_os_str().is_empty() {
                let relative: PathBuf = PathBuf::from(&record.storage_path)
                    .components()
                    .skip(1)
                    .collect();
                record.abs_path = base_dir.join(relative);
            }
        }
        Ok(Self {
            base_dir,
            allow_mime: config.allow_mime.iter().map(|m| m.to_lowercase()).collect(),
            max_upload_bytes: config.max_upload_bytes(),
            records: Mutex::new(records),
            index_path,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Stage one upload. Size and MIME are validated before the record
    /// becomes visible.
    pub fn save_upload(
        &self,
        filename: Option<&str>,
        bytes: &[u8],
        source: Option<&str>,
        tags_value: Option<&str>,
        lang_hint: Option<&str>,
    ) -> Result<UploadRecord> {
        let filename = filename.unwrap_or("").trim();
        if filename.is_empty() {
            return Err(Error::EmptyPayload("no file provided".to_string()));
        }
        if bytes.is_empty() {
            return Err(Error::EmptyPayload("uploaded file is empty".to_string()));
        }
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(Error::TooLarge {
                max_bytes: self.max_upload_bytes,
            });
        }

        let sanitized = clean_filename(filename);
        let content_type = sniff_mime(bytes, &sanitized);
        if !self.allow_mime.contains(&content_type) {
            return Err(Error::UnsupportedMime(content_type));
        }

        let upload_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let rel_dir = PathBuf::from(now.format("%Y").to_string())
            .join(now.format("%m").to_string())
            .join(now.format("%d").to_string())
            .join(&upload_id);
        let target_dir = self.base_dir.join(&rel_dir);
        std::fs::create_dir_all(&target_dir)?;
        let target_path = target_dir.join(&sanitized);
        std::fs::write(&target_path, bytes)?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let checksum = format!("{:x}", hasher.finalize());

        let storage_root = self
            .base_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "staging".to_string());
        let storage_path = PathBuf::from(storage_root)
            .join(&rel_dir)
            .join(&sanitized)
            .to_string_lossy()
            .replace('\\', "/");

        let record = UploadRecord {
            upload_id: upload_id.clone(),
            filename: sanitized,
            size_bytes: bytes.len() as u64,
            content_type,
            source: source
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("manual-upload")
                .to_string(),
            tags: parse_tags(tags_value),
            lang_hint: normalize_lang_hint(lang_hint),
            storage_path,
            checksum_sha256: checksum,
            created_at: now,
            abs_path: target_path,
        };

        let mut records = self.records.lock();
        records.insert(upload_id, record.clone());
        self.persist(&records)?;
        Ok(record)
    }

    pub fn get(&self, upload_id: &str) -> Option<UploadRecord> {
        self.records.lock().get(upload_id).cloned()
    }

    /// Fetch records for a job; any missing id fails the lookup.
    pub fn get_many(&self, upload_ids: &[String]) -> Result<Vec<UploadRecord>> {
        let records = self.records.lock();
        let mut found = Vec::with_capacity(upload_ids.len());
        let mut missing = Vec::new();
        for id in upload_ids {
            match records.get(id) {
                Some(record) => found.push(record.clone()),
                None => missing.push(id.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(Error::not_found(format!(
                "upload not found: {}",
                missing.join(", ")
            )));
        }
        Ok(found)
    }

    fn persist(&self, records: &HashMap<String, UploadRecord>) -> Result<()> {
        let body = serde_json::to_string_pretty(records)
            .map_err(|e| Error::internal(format!("uploads index serialization: {}", e)))?;
        let tmp = self.index_path.with_extension("tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.index_path)?;
        Ok(())
    }
}

fn load_index(path: &Path) -> Result<HashMap<String, UploadRecord>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str(&raw) {
        Ok(records) => Ok(records),
        Err(e) => {
            tracing::warn!("uploads index unreadable ({}); starting empty", e);
            Ok(HashMap::new())
        }
    }
}

fn clean_filename(filename: &str) -> String {
    let filename = filename.trim();
    match filename.rsplit_once('.') {
        Some((stem, suffix)) if !stem.is_empty() => {
            let stem = filename_re().replace_all(stem, "_").into_owned();
            let stem = if stem.is_empty() {
                "file".to_string()
            } else {
                stem
            };
            let suffix: String = suffix
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            if suffix.is_empty() {
                stem
            } else {
                format!("{}.{}", stem, suffix)
            }
        }
        _ => {
            let cleaned = filename_re().replace_all(filename, "_").into_owned();
            if cleaned.is_empty() {
                "file".to_string()
            } else {
                cleaned
            }
        }
    }
}

fn parse_tags(raw: Option<&str>) -> Vec<String> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Vec::new(),
    };
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(raw) {
        return items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                other => Some(other.to_string()),
            })
            .filter(|tag| !tag.is_empty())
            .collect();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_lang_hint(raw: Option<&str>) -> String {
    let hint = raw.unwrap_or("auto").trim().to_lowercase();
    if ALLOWED_LANG_HINTS.contains(&hint.as_str()) {
        hint
    } else {
        "auto".to_string()
    }
}

/// Sniff the MIME type from magic bytes, falling back to the extension.
fn sniff_mime(bytes: &[u8], filename: &str) -> String {
    if bytes.starts_with(b"%PDF") {
        return "application/pdf".to_string();
    }
    if bytes.starts_with(b"PK\x03\x04") {
        if let Some(subtype) = office_subtype(bytes) {
            return subtype;
        }
    }
    let head = &bytes[..bytes.len().min(4096)];
    let lowered = head.to_ascii_lowercase();
    if lowered.windows(5).any(|w| w == b"<html")
        || lowered.windows(14).any(|w| w == b"<!doctype html")
    {
        return "text/html".to_string();
    }
    if head
        .iter()
        .take(128)
        .all(|&b| (32..=126).contains(&b) || matches!(b, 9 | 10 | 13) || b >= 128)
        && std::str::from_utf8(head).is_ok()
    {
        return "text/plain".to_string();
    }
    match filename.rsplit('.').next().map(str::to_lowercase).as_deref() {
        Some("pdf") => "application/pdf",
        Some("docx") => crate::ingest::loader::MIME_DOCX,
        Some("pptx") => crate::ingest::loader::MIME_PPTX,
        Some("xlsx") => crate::ingest::loader::MIME_XLSX,
        Some("html") | Some("htm") => "text/html",
        Some("txt") | Some("md") => "text/plain",
        _ => "application/octet-stream",
    }
    .to_string()
}

fn office_subtype(bytes: &[u8]) -> Option<String> {
    let cursor = std::io::Cursor::new(bytes);
    let archive = zip::ZipArchive::new(cursor).ok()?;
    let names: Vec<&str> = archive.file_names().collect();
    if names.iter().any(|n| n.starts_with("word/")) {
        return Some(crate::ingest::loader::MIME_DOCX.to_string());
    }
    if names.iter().any(|n| n.starts_with("ppt/")) {
        return Some(crate::ingest::loader::MIME_PPTX.to_string());
    }
    if names.iter().any(|n| n.starts_with("xl/")) {
        return Some(crate::ingest::loader::MIME_XLSX.to_string());
    }
    None
}
