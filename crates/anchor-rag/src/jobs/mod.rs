//! Ingestion job registry and queue
//!
//! The registry is the source of truth for job state; API callers only
//! ever see snapshot copies. Job creation validates uploads, resolves the
//! target index version, writes the manifest snapshot and enqueues the
//! job id; a supervisor task runs job bodies concurrently.

pub mod eval;
pub mod runner;

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ingest::manifest::{write_manifest, ManifestEntry};
use crate::types::{JobOptions, JobSnapshot, JobStatus};

use runner::JobContext;

const MAX_LOG_LINES: usize = 40;
const QUEUE_DEPTH: usize = 256;

/// Request payload for job creation
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateJobRequest {
    pub upload_ids: Vec<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub lang_hint: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub update_alias: bool,
    #[serde(default)]
    pub evaluate: bool,
    #[serde(default)]
    pub domain_key: Option<String>,
}

/// In-memory job table. Creation runs under `create_lock` so the
/// conflict check and the insert are one atomic step.
pub struct JobRegistry {
    jobs: DashMap<Uuid, JobSnapshot>,
    create_lock: Mutex<()>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            create_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.jobs.get(&job_id).map(|entry| entry.clone())
    }

    /// Mutate one job under its entry lock.
    pub fn update<F: FnOnce(&mut JobSnapshot)>(&self, job_id: Uuid, mutate: F) {
        if let Some(mut entry) = self.jobs.get_mut(&job_id) {
            mutate(&mut entry);
        }
    }

    /// Append to the job's log ring (last 40 lines are kept).
    pub fn append_log(&self, job_id: Uuid, line: impl Into<String>) {
        if let Some(mut entry) = self.jobs.get_mut(&job_id) {
            entry.logs_tail.push(line.into());
            let overflow = entry.logs_tail.len().saturating_sub(MAX_LOG_LINES);
            if overflow > 0 {
                entry.logs_tail.drain(..overflow);
            }
        }
    }

    fn has_conflict(&self, upload_ids: &[String]) -> bool {
        let requested: HashSet<&str> = upload_ids.iter().map(String::as_str).collect();
        self.jobs.iter().any(|entry| {
            entry.status.is_active()
                && entry
                    .upload_ids
                    .iter()
                    .any(|id| requested.contains(id.as_str()))
        })
    }

    /// Highest `<alias>_vN` version any known job has claimed, including
    /// queued jobs whose table does not exist in the store yet.
    fn max_reserved_version(&self, alias: &str) -> u32 {
        let prefix = format!("{}_v", alias);
        self.jobs
            .iter()
            .filter_map(|entry| {
                entry
                    .physical_table
                    .strip_prefix(&prefix)
                    .and_then(|rest| rest.parse::<u32>().ok())
            })
            .max()
            .unwrap_or(0)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Front door of the job subsystem: owns the queue and the shared
/// dependencies the runner needs.
pub struct JobSystem {
    ctx: Arc<JobContext>,
    sender: mpsc::Sender<Uuid>,
}

impl JobSystem {
    /// Create the system and start the supervisor task.
    pub fn start(ctx: Arc<JobContext>, max_concurrent_jobs: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Uuid>(QUEUE_DEPTH);
        let supervisor_ctx = ctx.clone();
        let permits = Arc::new(Semaphore::new(max_concurrent_jobs.max(1)));

        tokio::spawn(async move {
            while let Some(job_id) = receiver.recv().await {
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let job_ctx = supervisor_ctx.clone();
                tokio::spawn(async move {
                    runner::run_job(job_ctx, job_id).await;
                    drop(permit);
                });
            }
        });

        Self { ctx, sender }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.ctx.registry
    }

    /// Validate and enqueue a job; returns the queued snapshot
    /// immediately, never waiting on execution.
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<JobSnapshot> {
        let upload_ids = request.upload_ids.clone();
        if upload_ids.is_empty() {
            return Err(Error::bad_request("upload_ids must not be empty"));
        }
        let unique: HashSet<&String> = upload_ids.iter().collect();
        if unique.len() != upload_ids.len() {
            return Err(Error::bad_request("upload_ids must be unique"));
        }

        let uploads = self.ctx.uploads.get_many(&upload_ids)?;
        let (profile_name, profile) = self
            .ctx
            .config
            .resolve_profile(request.profile.as_deref())?;

        // Ingest target: domain override wins, then the profile's alias,
        // then the default alias.
        let alias_name = match &request.domain_key {
            Some(key) => self
                .ctx
                .config
                .embeddings
                .domains
                .get(key)
                .map(|domain| domain.alias_name.clone())
                .ok_or_else(|| Error::UnknownDomain(key.clone()))?,
            None => profile
                .alias_name
                .clone()
                .unwrap_or_else(|| self.ctx.config.embeddings.alias.name.clone()),
        };

        let options = JobOptions {
            update_alias: request.update_alias,
            evaluate: request.evaluate,
            priority: request.priority,
            tags: request.tags.clone(),
            lang_hint: request.lang_hint.clone(),
            domain_key: request.domain_key.clone(),
        };

        let job = {
            let _guard = self.ctx.registry.create_lock.lock();
            if self.ctx.registry.has_conflict(&upload_ids) {
                return Err(Error::Conflict(
                    "an active job already references one of the uploads".to_string(),
                ));
            }

            let store_version = self.ctx.store.next_version(&alias_name)?;
            let reserved_version = self.ctx.registry.max_reserved_version(&alias_name) + 1;
            let version = store_version.max(reserved_version);
            let physical_table = format!("{}_v{}", alias_name, version);
            let job = JobSnapshot::new(
                profile_name,
                upload_ids,
                options,
                physical_table,
                alias_name,
            );

            let manifest_path = self.manifest_path(job.job_id);
            let entries = build_manifest_entries(&uploads, &job.options);
            write_manifest(&manifest_path, &entries)?;

            self.ctx.registry.jobs.insert(job.job_id, job.clone());
            job
        };

        if let Err(e) = self.sender.send(job.job_id).await {
            self.ctx.registry.update(job.job_id, |entry| {
                entry.status = JobStatus::Failed;
                entry.error = Some(crate::types::JobError {
                    code: "queue_closed".to_string(),
                    message: e.to_string(),
                    retryable: true,
                });
            });
            return Err(Error::internal("job queue is closed"));
        }

        Ok(job)
    }

    pub fn get_job(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.ctx.registry.snapshot(job_id)
    }

    pub fn manifest_path(&self, job_id: Uuid) -> PathBuf {
        self.ctx
            .uploads
            .base_dir()
            .join("manifests")
            .join(format!("{}.jsonl", job_id))
    }
}

/// Translate upload records into manifest lines, merging job-level tags
/// and language hints.
fn build_manifest_entries(
    uploads: &[crate::types::UploadRecord],
    options: &JobOptions,
) -> Vec<ManifestEntry> {
    let job_lang = options
        .lang_hint
        .as_deref()
        .unwrap_or("auto")
        .to_lowercase();

    uploads
        .iter()
        .map(|upload| {
            let mut tags: Vec<String> = upload
                .tags
                .iter()
                .chain(options.tags.iter())
                .cloned()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            tags.sort();

            let upload_lang = upload.lang_hint.to_lowercase();
            let lang = if job_lang != "auto" {
                Some(job_lang.clone())
            } else if upload_lang != "auto" {
                Some(upload_lang)
            } else {
                None
            };

            ManifestEntry {
                path: upload.abs_path.to_string_lossy().into_owned(),
                doc_id: Some(upload.upload_id.clone()),
                profile: None,
                tags,
                lang,
                priority: options.priority,
                metadata: Some(serde_json::json!({
                    "source": upload.source,
                    "content_type": upload.content_type,
                    "checksum_sha256": upload.checksum_sha256,
                })),
            }
        })
        .collect()
}
