//! Job execution pipeline
//!
//! manifest -> load -> clean -> sanitize -> chunk -> embed -> upsert ->
//! (evaluate) -> (rotate alias). Any fatal step marks the job failed
//! with a typed code; partial progress is kept for diagnostics and the
//! alias is never repointed on failure.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::config::{AppConfig, ChunkerKind};
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::ingest::chunker::{self, FigureOptions, RawChunk};
use crate::ingest::clean::clean_text;
use crate::ingest::loader::{route_and_load, DocItem};
use crate::ingest::manifest::{expand_manifest, ResolvedDoc};
use crate::jobs::eval;
use crate::jobs::JobRegistry;
use crate::sanitize::Sanitizer;
use crate::store::VectorStore;
use crate::types::chunk::{chunk_id, figure_chunk_id, hash_norm, hash_raw};
use crate::types::job::JobMetrics;
use crate::types::{ChunkKind, ChunkMeta, ChunkRecord, JobStatus, JobSummary};
use crate::uploads::UploadStore;

/// Dependencies shared by every job run
pub struct JobContext {
    pub config: AppConfig,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub sanitizer: Sanitizer,
    pub uploads: Arc<UploadStore>,
    pub registry: Arc<JobRegistry>,
}

/// Execute one job to completion or failure.
pub async fn run_job(ctx: Arc<JobContext>, job_id: Uuid) {
    let job = match ctx.registry.snapshot(job_id) {
        Some(job) => job,
        None => {
            tracing::warn!("job {} not found in registry", job_id);
            return;
        }
    };

    ctx.registry.update(job_id, |entry| {
        entry.status = JobStatus::Running;
        entry.started_at = Some(Utc::now());
    });
    tracing::info!("job {} running (table {})", job_id, job.physical_table);

    let started = Instant::now();
    match execute(&ctx, job_id).await {
        Ok(summary) => {
            let duration = started.elapsed().as_secs_f64();
            let throughput = if duration > 0.0 {
                summary.chunks as f64 / duration
            } else {
                0.0
            };
            ctx.registry.update(job_id, |entry| {
                entry.status = JobStatus::Succeeded;
                entry.finished_at = Some(Utc::now());
                if let Some(metrics) = entry.metrics.as_mut() {
                    metrics.duration_sec = (duration * 1000.0).round() / 1000.0;
                    metrics.throughput_chunks_per_s = (throughput * 1000.0).round() / 1000.0;
                } else {
                    entry.metrics = Some(JobMetrics {
                        duration_sec: (duration * 1000.0).round() / 1000.0,
                        throughput_chunks_per_s: (throughput * 1000.0).round() / 1000.0,
                        evaluate: entry.options.evaluate,
                        evaluation: None,
                    });
                }
                entry.summary = Some(summary.clone());
            });
            ctx.registry.append_log(job_id, summary.log_line());
            tracing::info!("job {} succeeded: {}", job_id, summary.log_line());
        }
        Err((code, error)) => {
            tracing::error!("job {} failed ({}): {}", job_id, code, error);
            ctx.registry.update(job_id, |entry| {
                entry.status = JobStatus::Failed;
                entry.finished_at = Some(Utc::now());
                entry.error = Some(crate::types::JobError {
                    code: code.to_string(),
                    message: error.to_string(),
                    retryable: error.is_transient(),
                });
            });
            ctx.registry
                .append_log(job_id, format!("failed ({}): {}", code, error));
        }
    }
}

type StepResult<T> = std::result::Result<T, (&'static str, Error)>;

async fn execute(ctx: &Arc<JobContext>, job_id: Uuid) -> StepResult<JobSummary> {
    let job = ctx
        .registry
        .snapshot(job_id)
        .ok_or_else(|| ("invariant_violated", Error::internal("job vanished")))?;

    let (profile_name, profile) = ctx
        .config
        .resolve_profile(Some(&job.profile))
        .map_err(|e| ("unknown_profile", e))?;
    let profile = profile.clone();
    let dedupe_enabled = profile
        .dedupe
        .unwrap_or(ctx.config.embeddings.dedupe.by_hash);

    // 1. Manifest expansion
    let manifest_path = ctx
        .uploads
        .base_dir()
        .join("manifests")
        .join(format!("{}.jsonl", job_id));
    let docs = expand_manifest(&manifest_path).map_err(|e| ("upload_missing", e))?;
    ctx.registry
        .append_log(job_id, format!("manifest resolved {} file(s)", docs.len()));
    ctx.registry.update(job_id, |entry| {
        entry.progress.files_total = docs.len();
    });

    // 2-5. Load, clean, sanitize, chunk
    let mut records: Vec<ChunkRecord> = Vec::new();
    let mut errors = 0usize;
    let mut type_counts: HashMap<String, usize> = HashMap::new();
    for doc in &docs {
        match prepare_document(ctx, &profile_name, &profile, doc, dedupe_enabled) {
            Ok(doc_records) => {
                for record in &doc_records {
                    let key = record
                        .meta
                        .content_type
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string());
                    *type_counts.entry(key).or_insert(0) += 1;
                }
                ctx.registry.update(job_id, |entry| {
                    entry.progress.files_processed += 1;
                    entry.progress.chunks_total += doc_records.len();
                });
                ctx.registry.append_log(
                    job_id,
                    format!("{}: {} chunk(s)", doc.doc_id, doc_records.len()),
                );
                records.extend(doc_records);
            }
            Err(e) => {
                errors += 1;
                tracing::warn!("job {}: failed to prepare {}: {}", job_id, doc.doc_id, e);
                ctx.registry
                    .append_log(job_id, format!("{}: load failed: {}", doc.doc_id, e));
            }
        }
    }
    if !type_counts.is_empty() {
        tracing::info!("job {}: chunk counts by type: {:?}", job_id, type_counts);
    }

    // 6-7. Embed in batches and upsert into the physical table
    let batch_size = ctx.config.embeddings.batching.batch_size.max(1);
    let mut inserted = 0usize;
    let mut skipped = 0usize;
    let mut table_ready = false;
    let total_batches = records.len().div_ceil(batch_size);

    for (batch_index, batch) in records.chunks_mut(batch_size).enumerate() {
        let texts: Vec<String> = batch
            .iter()
            .filter(|record| !record.text.trim().is_empty())
            .map(|record| record.text.clone())
            .collect();
        if texts.is_empty() {
            continue;
        }

        let vectors = ctx
            .embedder
            .embed_documents(&texts)
            .await
            .map_err(|e| ("embed_failed", e))?;

        let mut vector_iter = vectors.into_iter();
        for record in batch.iter_mut() {
            if record.text.trim().is_empty() {
                continue;
            }
            if let Some(vector) = vector_iter.next() {
                record.embedding = vector;
            }
        }

        if !table_ready {
            let dim = batch
                .iter()
                .map(|record| record.embedding.len())
                .find(|&len| len > 0)
                .unwrap_or(0);
            if dim == 0 {
                continue;
            }
            ctx.store
                .ensure_index_table(&job.physical_table, dim, profile.distance_metric)
                .map_err(|e| match e {
                    Error::SchemaDrift { .. } => ("schema_drift", e),
                    other => ("upsert_failed", other),
                })?;
            table_ready = true;
        }

        let ready: Vec<ChunkRecord> = batch
            .iter()
            .filter(|record| !record.embedding.is_empty())
            .cloned()
            .collect();
        let outcome = ctx
            .store
            .upsert(&job.physical_table, &ready, dedupe_enabled)
            .map_err(|e| match e {
                Error::SchemaDrift { .. } => ("schema_drift", e),
                other => ("upsert_failed", other),
            })?;
        inserted += outcome.inserted;
        skipped += outcome.skipped;

        ctx.registry.update(job_id, |entry| {
            entry.progress.chunks_indexed = inserted;
            entry.progress.dedupe_skipped = skipped;
        });
        ctx.registry.append_log(
            job_id,
            format!("batch {}/{} upserted", batch_index + 1, total_batches),
        );
    }

    let mut summary = JobSummary {
        docs: docs.len(),
        chunks: records.len(),
        inserted,
        skipped,
        errors,
        updated_alias: false,
        promotion_blocked: false,
    };

    // 8. Golden-query evaluation against the physical table
    let mut gate_failure: Option<&'static str> = None;
    if job.options.evaluate {
        let golden_path = ctx
            .config
            .evaluation
            .golden_path
            .clone()
            .ok_or_else(|| {
                (
                    "eval_failed",
                    Error::internal("evaluate requested but evaluation.golden_path is not set"),
                )
            })?;
        let report = eval::evaluate_golden(
            &ctx.store,
            &ctx.embedder,
            &job.physical_table,
            &golden_path,
            ctx.config.retrieval.top_k,
        )
        .await
        .map_err(|e| ("eval_failed", e))?;

        gate_failure = report.failed_gate(&ctx.config.evaluation.gates);
        if let Some(gate) = gate_failure {
            ctx.registry
                .append_log(job_id, format!("evaluation gate failed: {}", gate));
        }
        let report_json = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);
        ctx.registry.update(job_id, |entry| {
            entry.metrics = Some(JobMetrics {
                duration_sec: 0.0,
                throughput_chunks_per_s: 0.0,
                evaluate: true,
                evaluation: Some(report_json.clone()),
            });
        });
    }

    // 9. Alias rotation, gated on successful inserts and evaluation
    if job.options.update_alias {
        if inserted == 0 {
            ctx.registry
                .append_log(job_id, "alias not rotated: no rows inserted".to_string());
        } else if let Some(gate) = gate_failure {
            summary.promotion_blocked = true;
            tracing::warn!(
                "job {}: promotion blocked by evaluation gate {}",
                job_id,
                gate
            );
        } else {
            ctx.store
                .ensure_alias(&job.alias_name, &job.physical_table)
                .map_err(|e| ("alias_failed", e))?;
            summary.updated_alias = true;
            ctx.registry.append_log(
                job_id,
                format!("alias {} -> {}", job.alias_name, job.physical_table),
            );
        }
    }

    Ok(summary)
}

/// Load, clean, sanitize and chunk one manifest document.
fn prepare_document(
    ctx: &Arc<JobContext>,
    profile_name: &str,
    profile: &crate::config::Profile,
    doc: &ResolvedDoc,
    dedupe_enabled: bool,
) -> Result<Vec<ChunkRecord>> {
    let assets = &ctx.config.assets;
    let items = route_and_load(&doc.path, assets.docx_image_extraction)?;

    // Clean then sanitize each item; sanitizer failures degrade silently.
    let mut prepared: Vec<DocItem> = Vec::new();
    for mut item in items {
        if item.block_type.as_deref() == Some("image") {
            prepared.push(item);
            continue;
        }
        let preserve_tables = item.sheet_name.is_some()
            || item.content_type.contains("spreadsheetml");
        let cleaned = clean_text(&item.text, preserve_tables);
        if cleaned.is_empty() {
            continue;
        }
        let sanitized = match ctx.sanitizer.sanitize(&cleaned, &doc.doc_id) {
            Ok((text, counters)) => {
                if !counters.is_empty() {
                    tracing::info!("sanitizer[{}]: {:?}", doc.doc_id, counters);
                }
                text
            }
            Err(e) => {
                tracing::warn!(
                    "sanitizer failed for {} ({}); continuing without changes",
                    doc.doc_id,
                    e
                );
                cleaned
            }
        };
        item.text = sanitized;
        prepared.push(item);
    }

    let mut raw_chunks = chunker::chunk_items(&prepared, profile, FigureOptions::from(assets));
    if matches!(
        profile.chunker.kind,
        ChunkerKind::StructuredDocx | ChunkerKind::TocSectionDocx
    ) {
        if let Some(title) = chunker::strip_repeated_doc_title(&mut raw_chunks) {
            tracing::debug!("{}: repeated doc title stripped: {}", doc.doc_id, title);
        }
    }

    // Chunk ids first so figure backlinks can resolve.
    let mut local_to_chunk_id: HashMap<usize, String> = HashMap::new();
    for raw in raw_chunks.iter().filter(|raw| !raw.is_figure) {
        local_to_chunk_id.insert(raw.local_index, chunk_id(&doc.doc_id, raw.local_index));
    }

    let checksum = doc
        .metadata
        .as_ref()
        .and_then(|m| m.get("checksum_sha256"))
        .and_then(|v| v.as_str())
        .filter(|_| profile.metadata_keep.iter().any(|k| k == "checksum_sha256"))
        .map(str::to_string);

    let mut records = Vec::with_capacity(raw_chunks.len());
    for raw in raw_chunks {
        let record = build_record(
            ctx,
            profile_name,
            doc,
            &raw,
            &local_to_chunk_id,
            checksum.clone(),
            dedupe_enabled,
        )?;
        if let Some(record) = record {
            records.push(record);
        }
    }
    Ok(records)
}

/// Turn one raw chunk into a store record; figures also persist their
/// asset file when extraction is enabled.
fn build_record(
    ctx: &Arc<JobContext>,
    profile_name: &str,
    doc: &ResolvedDoc,
    raw: &RawChunk,
    local_to_chunk_id: &HashMap<usize, String>,
    checksum: Option<String>,
    dedupe_enabled: bool,
) -> Result<Option<ChunkRecord>> {
    let text = raw.text.trim().to_string();
    if text.is_empty() {
        return Ok(None);
    }

    let (record_id, kind) = if raw.is_figure {
        let figure_id = raw
            .figure_id
            .clone()
            .ok_or_else(|| Error::internal("figure chunk without figure_id"))?;
        let image_ref = persist_asset(ctx, doc, raw, &figure_id)?;
        let parent_chunk_id = raw
            .parent_local_index
            .and_then(|index| local_to_chunk_id.get(&index).cloned());
        (
            figure_chunk_id(&doc.doc_id, &figure_id),
            ChunkKind::Figure {
                figure_id,
                image_ref,
                parent_chunk_id,
                parent_chunk_local_index: raw.parent_local_index,
            },
        )
    } else {
        (chunk_id(&doc.doc_id, raw.local_index), ChunkKind::Text)
    };

    let meta = ChunkMeta {
        tags: doc.tags.clone(),
        lang: doc.lang.clone(),
        priority: doc.priority,
        block_type: raw.block_type.clone(),
        section_path: raw.section_path.clone(),
        page: raw.page,
        slide_number: raw.slide_number,
        sheet_name: raw.sheet_name.clone(),
        doc_title: raw.doc_title.clone(),
        content_type: raw.content_type.clone(),
        profile: Some(profile_name.to_string()),
        checksum_sha256: checksum,
    };

    let hash = if dedupe_enabled {
        if ctx.config.embeddings.dedupe.hash_normalization {
            Some(hash_norm(&text))
        } else {
            Some(hash_raw(&text))
        }
    } else {
        None
    };

    Ok(Some(ChunkRecord {
        chunk_id: record_id,
        doc_id: doc.doc_id.clone(),
        text,
        source: doc.path.to_string_lossy().into_owned(),
        kind,
        meta,
        hash_norm: hash,
        embedding: Vec::new(),
    }))
}

/// Write the figure's bytes under `<assets_root>/<doc_id>/img_<NNN>.<ext>`
/// and return the relative `image_ref`.
fn persist_asset(
    ctx: &Arc<JobContext>,
    doc: &ResolvedDoc,
    raw: &RawChunk,
    figure_id: &str,
) -> Result<String> {
    let ordinal = figure_id.rsplit('_').next().unwrap_or("000");
    let extension = raw
        .image_name
        .as_deref()
        .and_then(|name| name.rsplit('.').next())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("png")
        .to_lowercase();
    let relative = format!("{}/img_{}.{}", doc.doc_id, ordinal, extension);

    if ctx.config.assets.docx_image_extraction {
        if let Some(bytes) = &raw.image_data {
            let target = ctx.config.assets.root.join(&relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, bytes)?;
        }
    }
    Ok(relative)
}
