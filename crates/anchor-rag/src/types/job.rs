//! Ingestion job model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job lifecycle. `Succeeded`/`Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Active jobs hold a logical lock on their uploads
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

/// Options supplied at job creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub update_alias: bool,
    #[serde(default)]
    pub evaluate: bool,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub lang_hint: Option<String>,
    #[serde(default)]
    pub domain_key: Option<String>,
}

/// Continuously updated progress counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub files_total: usize,
    pub files_processed: usize,
    pub chunks_total: usize,
    pub chunks_indexed: usize,
    pub dedupe_skipped: usize,
}

/// Final counters of a finished job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSummary {
    pub docs: usize,
    pub chunks: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub updated_alias: bool,
    /// True when evaluation gates blocked alias rotation
    pub promotion_blocked: bool,
}

impl JobSummary {
    pub fn log_line(&self) -> String {
        format!(
            "docs={} chunks={} inserted={} skipped={} errors={}",
            self.docs, self.chunks, self.inserted, self.skipped, self.errors
        )
    }
}

/// Derived timing and evaluation metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetrics {
    pub duration_sec: f64,
    pub throughput_chunks_per_s: f64,
    pub evaluate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<serde_json::Value>,
}

/// Typed failure attached to a failed job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// One of: upload_missing, unknown_profile, schema_drift,
    /// embed_failed, upsert_failed, alias_failed, eval_failed
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Full job state; `snapshot()` copies are what API callers see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub profile: String,
    pub upload_ids: Vec<String>,
    pub options: JobOptions,
    /// Physical index the job writes into, chosen at creation
    pub physical_table: String,
    /// Alias the job may rotate on success
    pub alias_name: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: JobProgress,
    pub summary: Option<JobSummary>,
    pub metrics: Option<JobMetrics>,
    pub error: Option<JobError>,
    pub logs_tail: Vec<String>,
}

impl JobSnapshot {
    pub fn new(
        profile: String,
        upload_ids: Vec<String>,
        options: JobOptions,
        physical_table: String,
        alias_name: String,
    ) -> Self {
        let files_total = upload_ids.len();
        Self {
            job_id: Uuid::new_v4(),
            status: JobStatus::Queued,
            profile,
            upload_ids,
            options,
            physical_table,
            alias_name,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            progress: JobProgress {
                files_total,
                ..JobProgress::default()
            },
            summary: None,
            metrics: None,
            error: None,
            logs_tail: Vec::new(),
        }
    }
}
