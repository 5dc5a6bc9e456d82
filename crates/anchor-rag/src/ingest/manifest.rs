//! JSONL manifest parsing and glob expansion
//!
//! One JSON object per line; `path` is required and may be a glob,
//! resolved relative to the manifest file. Unmatched paths fail the job.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// One manifest line as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A manifest entry resolved to one concrete file
#[derive(Debug, Clone)]
pub struct ResolvedDoc {
    pub path: PathBuf,
    pub doc_id: String,
    pub tags: Vec<String>,
    pub lang: Option<String>,
    pub priority: Option<u8>,
    pub metadata: Option<serde_json::Value>,
}

fn has_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}

fn parse_lines(raw: &str) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: ManifestEntry = serde_json::from_str(line).map_err(|e| {
            Error::bad_request(format!("invalid manifest JSON at line {}: {}", lineno + 1, e))
        })?;
        if entry.path.is_empty() {
            return Err(Error::bad_request(format!(
                "manifest line {} missing 'path'",
                lineno + 1
            )));
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn doc_id_for(path: &Path, entry: &ManifestEntry) -> String {
    entry.doc_id.clone().unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "doc".to_string())
    })
}

/// Read a manifest file, expand globs, and fail on any path that resolves
/// to nothing. The error message lists every offender so a failed job is
/// diagnosable in one look.
pub fn expand_manifest(manifest_path: &Path) -> Result<Vec<ResolvedDoc>> {
    let raw = std::fs::read_to_string(manifest_path)
        .map_err(|e| Error::internal(format!("cannot read manifest {}: {}", manifest_path.display(), e)))?;
    let entries = parse_lines(&raw)?;
    let base_dir = manifest_path.parent().unwrap_or(Path::new("."));

    let mut resolved = Vec::new();
    let mut missing: Vec<String> = Vec::new();

    for entry in &entries {
        let raw_path = PathBuf::from(&entry.path);
        let absolute = if raw_path.is_absolute() {
            raw_path
        } else {
            base_dir.join(&raw_path)
        };
        let pattern = absolute.to_string_lossy().into_owned();

        if has_glob(&pattern) {
            let matches: Vec<PathBuf> = match glob::glob(&pattern) {
                Ok(paths) => {
                    let mut found: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
                    found.sort();
                    found
                }
                Err(e) => {
                    return Err(Error::bad_request(format!(
                        "invalid glob '{}': {}",
                        entry.path, e
                    )))
                }
            };
            if matches.is_empty() {
                missing.push(entry.path.clone());
                continue;
            }
            let suffix_needed = matches.len() > 1 || entry.doc_id.is_some();
            for (idx, path) in matches.into_iter().enumerate() {
                let base = doc_id_for(&path, entry);
                let doc_id = if suffix_needed {
                    format!("{}_{}", base, idx + 1)
                } else {
                    base
                };
                resolved.push(ResolvedDoc {
                    path,
                    doc_id,
                    tags: entry.tags.clone(),
                    lang: entry.lang.clone(),
                    priority: entry.priority,
                    metadata: entry.metadata.clone(),
                });
            }
        } else if absolute.exists() {
            resolved.push(ResolvedDoc {
                doc_id: doc_id_for(&absolute, entry),
                path: absolute,
                tags: entry.tags.clone(),
                lang: entry.lang.clone(),
                priority: entry.priority,
                metadata: entry.metadata.clone(),
            });
        } else {
            missing.push(entry.path.clone());
        }
    }

    if !missing.is_empty() {
        return Err(Error::not_found(format!(
            "manifest paths matched no files: {}",
            missing.join(", ")
        )));
    }
    Ok(resolved)
}

/// Serialize manifest entries as JSON lines.
pub fn write_manifest(path: &Path, entries: &[ManifestEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut body = String::new();
    for entry in entries {
        body.push_str(
            &serde_json::to_string(entry)
                .map_err(|e| Error::internal(format!("manifest serialization: {}", e)))?,
        );
        body.push('\n');
    }
    std::fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn resolves_relative_paths_against_manifest_dir() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", "alpha");
        let manifest = write(&dir, "m.jsonl", r#"{"path": "a.txt"}"#);
        let docs = expand_manifest(&manifest).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, "a");
        assert!(docs[0].path.is_absolute() || docs[0].path.exists());
    }

    #[test]
    fn glob_matches_get_suffixed_doc_ids() {
        let dir = TempDir::new().unwrap();
        write(&dir, "r1.txt", "one");
        write(&dir, "r2.txt", "two");
        let manifest = write(
            &dir,
            "m.jsonl",
            r#"{"path": "r*.txt", "doc_id": "report", "tags": ["batch"]}"#,
        );
        let docs = expand_manifest(&manifest).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].doc_id, "report_1");
        assert_eq!(docs[1].doc_id, "report_2");
        assert_eq!(docs[0].tags, vec!["batch".to_string()]);
    }

    #[test]
    fn missing_file_fails_with_offender_list() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", "alpha");
        let manifest = write(
            &dir,
            "m.jsonl",
            "{\"path\": \"a.txt\"}\n{\"path\": \"gone.txt\"}\n",
        );
        let err = expand_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("gone.txt"));
    }

    #[test]
    fn empty_glob_fails() {
        let dir = TempDir::new().unwrap();
        let manifest = write(&dir, "m.jsonl", r#"{"path": "*.pdf"}"#);
        let err = expand_manifest(&manifest).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn invalid_json_line_is_reported_with_line_number() {
        let dir = TempDir::new().unwrap();
        let manifest = write(&dir, "m.jsonl", "{\"path\": \"a.txt\"}\nnot json\n");
        let err = expand_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn round_trips_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.jsonl");
        let entries = vec![ManifestEntry {
            path: "/data/doc.pdf".into(),
            doc_id: Some("doc".into()),
            profile: None,
            tags: vec!["kb".into()],
            lang: Some("es".into()),
            priority: Some(5),
            metadata: Some(serde_json::json!({"source": "manual-upload"})),
        }];
        write_manifest(&path, &entries).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: ManifestEntry = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(parsed.doc_id.as_deref(), Some("doc"));
        assert_eq!(parsed.priority, Some(5));
    }
}
