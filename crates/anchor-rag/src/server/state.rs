//! Application state
//!
//! Every collaborator is an explicit dependency value constructed once at
//! startup and shared through this struct; nothing hides in module
//! globals.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::embed::{Embedder, HttpEmbedder};
use crate::error::Result;
use crate::jobs::runner::JobContext;
use crate::jobs::{JobRegistry, JobSystem};
use crate::llm::{ChatModel, HttpChatModel};
use crate::retrieval::RetrievalService;
use crate::sanitize::Sanitizer;
use crate::store::{SqliteVectorStore, VectorStore};
use crate::uploads::UploadStore;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AppConfig,
    retrieval: RetrievalService,
    jobs: JobSystem,
    uploads: Arc<UploadStore>,
    embedder: Arc<dyn Embedder>,
    primary: Arc<dyn ChatModel>,
    fallback: Arc<dyn ChatModel>,
}

impl AppState {
    /// Wire up the full dependency graph. Must run inside a tokio
    /// runtime: the job supervisor is spawned here.
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open(&config.store.db_path)?);
        tracing::info!("vector store at {}", config.store.db_path.display());

        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(&config.embeddings));
        tracing::info!(
            "embedder {} (dim {})",
            config.embeddings.model,
            config.embeddings.dimension
        );

        let primary: Arc<dyn ChatModel> =
            Arc::new(HttpChatModel::new(config.llm.primary.clone()));
        let fallback: Arc<dyn ChatModel> =
            Arc::new(HttpChatModel::new(config.llm.fallback.clone()));
        tracing::info!(
            "chat models: primary={} fallback={}",
            primary.model(),
            fallback.model()
        );

        let sanitizer = Sanitizer::new(config.sanitizer.clone());
        let uploads = Arc::new(UploadStore::new(&config.ingest)?);

        let retrieval = RetrievalService::new(
            store.clone(),
            embedder.clone(),
            primary.clone(),
            fallback.clone(),
            &config,
        );

        let job_ctx = Arc::new(JobContext {
            config: config.clone(),
            store,
            embedder: embedder.clone(),
            sanitizer,
            uploads: uploads.clone(),
            registry: Arc::new(JobRegistry::new()),
        });
        let max_concurrent_jobs = num_cpus::get().min(4);
        let jobs = JobSystem::start(job_ctx, max_concurrent_jobs);
        tracing::info!("job supervisor started ({} concurrent jobs)", max_concurrent_jobs);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                retrieval,
                jobs,
                uploads,
                embedder,
                primary,
                fallback,
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn retrieval(&self) -> &RetrievalService {
        &self.inner.retrieval
    }

    pub fn jobs(&self) -> &JobSystem {
        &self.inner.jobs
    }

    pub fn uploads(&self) -> &Arc<UploadStore> {
        &self.inner.uploads
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.inner.embedder
    }

    pub fn primary_llm(&self) -> &Arc<dyn ChatModel> {
        &self.inner.primary
    }

    pub fn fallback_llm(&self) -> &Arc<dyn ChatModel> {
        &self.inner.fallback
    }
}
