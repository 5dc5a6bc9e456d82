//! Ingestion pipeline tests: uploads through job execution to alias
//! rotation, with a deterministic embedding stub.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use anchor_rag::config::{AppConfig, ChunkerKind, Distance};
use anchor_rag::embed::Embedder;
use anchor_rag::error::{Error, Result};
use anchor_rag::jobs::runner::JobContext;
use anchor_rag::jobs::{CreateJobRequest, JobRegistry, JobSystem};
use anchor_rag::sanitize::Sanitizer;
use anchor_rag::store::{SqliteVectorStore, VectorStore};
use anchor_rag::types::{JobStatus, UploadRecord};
use anchor_rag::uploads::UploadStore;
use tempfile::TempDir;

const DIM: usize = 4;

/// Deterministic embedding: a cheap hash of the text spread over DIM
/// dimensions, so identical texts embed identically.
struct HashEmbedder;

fn hash_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIM];
    for (index, byte) in text.bytes().enumerate() {
        vector[index % DIM] += byte as f32 / 255.0;
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .filter(|text| !text.trim().is_empty())
            .map(|text| hash_vector(text))
            .collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_vector(text))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Embedder that always fails, for the embed_failed path.
struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::embed_failed("upstream exploded", true))
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::embed_failed("upstream exploded", true))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn health(&self) -> Result<()> {
        Err(Error::embed_failed("upstream exploded", true))
    }
}

struct Harness {
    _dir: TempDir,
    system: JobSystem,
    store: Arc<dyn VectorStore>,
    uploads: Arc<UploadStore>,
}

fn harness_with(embedder: Arc<dyn Embedder>, mutate: impl FnOnce(&mut AppConfig)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.ingest.staging_dir = dir.path().join("staging");
    config.assets.root = dir.path().join("assets");
    config.store.db_path = dir.path().join("vectors.db");
    config.embeddings.alias.name = "MY_DEMO".to_string();
    config.embeddings.dimension = DIM;
    {
        let profile = config
            .embeddings
            .profiles
            .get_mut("legacy_profile")
            .unwrap();
        profile.index_name = "MY_DEMO".to_string();
        profile.chunker.kind = ChunkerKind::Char;
        profile.chunker.size = 400;
        profile.chunker.overlap = 0.0;
        profile.distance_metric = Distance::DotProduct;
    }
    mutate(&mut config);

    let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::in_memory().unwrap());
    let uploads = Arc::new(UploadStore::new(&config.ingest).unwrap());
    let ctx = Arc::new(JobContext {
        config: config.clone(),
        store: store.clone(),
        embedder,
        sanitizer: Sanitizer::new(config.sanitizer.clone()),
        uploads: uploads.clone(),
        registry: Arc::new(JobRegistry::new()),
    });
    let system = JobSystem::start(ctx, 2);
    Harness {
        _dir: dir,
        system,
        store,
        uploads,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(HashEmbedder), |_| {})
}

fn stage_text(harness: &Harness, name: &str, body: &str) -> UploadRecord {
    harness
        .uploads
        .save_upload(Some(name), body.as_bytes(), None, None, None)
        .unwrap()
}

async fn wait_terminal(harness: &Harness, job_id: uuid::Uuid) -> anchor_rag::types::JobSnapshot {
    for _ in 0..200 {
        if let Some(snapshot) = harness.system.get_job(job_id) {
            if snapshot.status.is_terminal() {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not reach a terminal state", job_id);
}

fn request(upload_ids: Vec<String>, update_alias: bool) -> CreateJobRequest {
    CreateJobRequest {
        upload_ids,
        profile: Some("legacy_profile".to_string()),
        tags: vec!["test".to_string()],
        lang_hint: None,
        priority: None,
        update_alias,
        evaluate: false,
        domain_key: None,
    }
}

#[tokio::test]
async fn job_ingests_text_uploads_and_rotates_alias() {
    let harness = harness();
    let upload_a = stage_text(
        &harness,
        "reset.txt",
        "Hold the reset button for ten seconds until the lights blink twice.",
    );
    let upload_b = stage_text(
        &harness,
        "wifi.txt",
        "Change the wifi password from the administration panel on port 8080.",
    );

    let job = harness
        .system
        .create_job(request(
            vec![upload_a.upload_id.clone(), upload_b.upload_id.clone()],
            true,
        ))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.physical_table, "MY_DEMO_v1");

    let done = wait_terminal(&harness, job.job_id).await;
    assert_eq!(done.status, JobStatus::Succeeded);
    let summary = done.summary.unwrap();
    assert_eq!(summary.docs, 2);
    assert!(summary.inserted >= 2);
    assert_eq!(summary.skipped, 0);
    assert!(summary.updated_alias);
    assert_eq!(done.progress.files_processed, 2);
    assert_eq!(done.progress.chunks_indexed, summary.inserted);
    assert!(!done.logs_tail.is_empty());

    // Alias points at the physical table and search works through it.
    assert_eq!(
        harness.store.alias_target("MY_DEMO").unwrap().as_deref(),
        Some("MY_DEMO_v1")
    );
    let query = hash_vector("Hold the reset button for ten seconds until the lights blink twice.");
    let rows = harness.store.similarity_search("MY_DEMO", &query, 2).unwrap();
    assert!(!rows.is_empty());
    assert_eq!(rows[0].doc_id, upload_a.upload_id);
    assert_eq!(
        rows[0].metadata["tags"],
        serde_json::json!(["test"]),
    );
}

#[tokio::test]
async fn overlapping_active_jobs_conflict() {
    let harness = harness();
    let upload = stage_text(&harness, "doc.txt", "Some document content for the index.");

    let first = harness
        .system
        .create_job(request(vec![upload.upload_id.clone()], false))
        .await
        .unwrap();

    // The first job is still queued or running: a second job over the
    // same upload must be rejected.
    let second = harness
        .system
        .create_job(request(vec![upload.upload_id.clone()], false))
        .await;
    assert!(matches!(second, Err(Error::Conflict(_))));

    let done = wait_terminal(&harness, first.job_id).await;
    assert_eq!(done.status, JobStatus::Succeeded);

    // After the first job finishes the upload is free again.
    let third = harness
        .system
        .create_job(request(vec![upload.upload_id], false))
        .await
        .unwrap();
    assert_eq!(third.physical_table, "MY_DEMO_v2");
    wait_terminal(&harness, third.job_id).await;
}

#[tokio::test]
async fn job_without_update_alias_leaves_alias_alone() {
    let harness = harness();
    let upload = stage_text(&harness, "doc.txt", "Content that lands in a versioned table.");
    let job = harness
        .system
        .create_job(request(vec![upload.upload_id], false))
        .await
        .unwrap();
    let done = wait_terminal(&harness, job.job_id).await;
    assert_eq!(done.status, JobStatus::Succeeded);
    assert!(!done.summary.unwrap().updated_alias);
    assert_eq!(harness.store.alias_target("MY_DEMO").unwrap(), None);
}

#[tokio::test]
async fn embed_failure_marks_job_failed_and_keeps_alias() {
    let harness = harness_with(Arc::new(BrokenEmbedder), |_| {});
    let upload = stage_text(&harness, "doc.txt", "Content that will never be embedded.");
    let job = harness
        .system
        .create_job(request(vec![upload.upload_id], true))
        .await
        .unwrap();
    let done = wait_terminal(&harness, job.job_id).await;
    assert_eq!(done.status, JobStatus::Failed);
    let error = done.error.unwrap();
    assert_eq!(error.code, "embed_failed");
    assert!(error.retryable);
    // Alias never moves on failure.
    assert_eq!(harness.store.alias_target("MY_DEMO").unwrap(), None);
    // Partial progress survives for diagnostics.
    assert_eq!(done.progress.files_processed, 1);
}

#[tokio::test]
async fn duplicate_upload_ids_are_rejected() {
    let harness = harness();
    let upload = stage_text(&harness, "doc.txt", "content goes here for the test");
    let result = harness
        .system
        .create_job(request(
            vec![upload.upload_id.clone(), upload.upload_id],
            false,
        ))
        .await;
    assert!(matches!(result, Err(Error::BadRequest(_))));

    let empty = harness.system.create_job(request(vec![], false)).await;
    assert!(matches!(empty, Err(Error::BadRequest(_))));
}

#[tokio::test]
async fn missing_upload_is_not_found() {
    let harness = harness();
    let result = harness
        .system
        .create_job(request(vec!["ghost".to_string()], false))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn unknown_profile_is_rejected() {
    let harness = harness();
    let upload = stage_text(&harness, "doc.txt", "content goes here for the test");
    let mut req = request(vec![upload.upload_id], false);
    req.profile = Some("no_such_profile".to_string());
    let result = harness.system.create_job(req).await;
    assert!(matches!(result, Err(Error::UnknownProfile(_))));
}

#[tokio::test]
async fn evaluation_gate_blocks_promotion() {
    let dir = TempDir::new().unwrap();
    let golden = dir.path().join("golden.json");
    // Expect a doc id that never matches: hit_rate stays 0.
    std::fs::write(
        &golden,
        r#"{"queries": [{"query": "reset", "expect_doc_ids": ["not_a_real_doc"]}]}"#,
    )
    .unwrap();

    let golden_for_config = golden.clone();
    let harness = harness_with(Arc::new(HashEmbedder), move |config| {
        config.evaluation.golden_path = Some(golden_for_config);
        config.evaluation.gates.min_hit_rate = Some(0.5);
    });
    let upload = stage_text(&harness, "doc.txt", "Hold the reset button for ten seconds.");
    let mut req = request(vec![upload.upload_id], true);
    req.evaluate = true;

    let job = harness.system.create_job(req).await.unwrap();
    let done = wait_terminal(&harness, job.job_id).await;

    assert_eq!(done.status, JobStatus::Succeeded);
    let summary = done.summary.unwrap();
    assert!(summary.promotion_blocked);
    assert!(!summary.updated_alias);
    assert_eq!(harness.store.alias_target("MY_DEMO").unwrap(), None);
    let metrics = done.metrics.unwrap();
    assert!(metrics.evaluate);
    let evaluation = metrics.evaluation.unwrap();
    assert_eq!(evaluation["hit_rate"], serde_json::json!(0.0));
}

#[tokio::test]
async fn evaluation_passing_gates_allows_promotion() {
    let dir = TempDir::new().unwrap();
    let golden = dir.path().join("golden.json");
    let text = "Hold the reset button for ten seconds.";

    let golden_for_config = golden.clone();
    let harness = harness_with(Arc::new(HashEmbedder), move |config| {
        config.evaluation.golden_path = Some(golden_for_config);
        config.evaluation.gates.min_phrase_hit_rate = Some(1.0);
    });
    let upload = stage_text(&harness, "doc.txt", text);
    // The golden query embeds to exactly the chunk's vector, so the
    // phrase is guaranteed to be found in the top result.
    std::fs::write(
        &golden,
        format!(
            r#"{{"queries": [{{"query": "{}", "expect_doc_ids": ["{}"], "expect_phrases": ["reset button"]}}]}}"#,
            text, upload.upload_id
        ),
    )
    .unwrap();

    let mut req = request(vec![upload.upload_id.clone()], true);
    req.evaluate = true;
    let job = harness.system.create_job(req).await.unwrap();
    let done = wait_terminal(&harness, job.job_id).await;

    assert_eq!(done.status, JobStatus::Succeeded);
    let summary = done.summary.unwrap();
    assert!(!summary.promotion_blocked);
    assert!(summary.updated_alias);
    assert_eq!(
        harness.store.alias_target("MY_DEMO").unwrap().as_deref(),
        Some("MY_DEMO_v1")
    );
}

#[tokio::test]
async fn vanished_upload_file_fails_with_upload_missing() {
    let harness = harness();
    let upload = stage_text(&harness, "doc.txt", "content that is about to vanish");
    std::fs::remove_file(&upload.abs_path).unwrap();

    let job = harness
        .system
        .create_job(request(vec![upload.upload_id], false))
        .await
        .unwrap();
    let done = wait_terminal(&harness, job.job_id).await;
    assert_eq!(done.status, JobStatus::Failed);
    let error = done.error.unwrap();
    assert_eq!(error.code, "upload_missing");
    assert!(error.message.contains("doc.txt"));
}

#[tokio::test]
async fn evaluate_without_golden_path_fails_typed() {
    let harness = harness();
    let upload = stage_text(&harness, "doc.txt", "some indexable content right here");
    let mut req = request(vec![upload.upload_id], true);
    req.evaluate = true;
    let job = harness.system.create_job(req).await.unwrap();
    let done = wait_terminal(&harness, job.job_id).await;
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error.unwrap().code, "eval_failed");
    assert_eq!(harness.store.alias_target("MY_DEMO").unwrap(), None);
}
