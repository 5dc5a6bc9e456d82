//! Embedding provider
//!
//! Wraps a remote embedding model behind the `Embedder` trait. The HTTP
//! implementation batches document requests, shares one process-wide rate
//! limiter at request granularity, and retries transient failures with
//! exponential backoff before surfacing a typed error.

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::config::EmbeddingsConfig;
use crate::error::{Error, Result};

/// Embedding seam used by retrieval and ingestion.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts. Callers pass non-empty texts;
    /// whitespace-only entries are skipped and produce no vector.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Declared vector dimension; every returned vector matches it.
    fn dimension(&self) -> usize;

    /// Probe upstream availability.
    async fn health(&self) -> Result<()>;
}

/// Minimum-interval limiter shared across all embedding requests of the
/// process. Serialises at the granularity of requests, not batches.
pub struct RateLimiter {
    min_interval: Option<Duration>,
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(rate_limit_per_min: Option<u32>) -> Self {
        let min_interval = rate_limit_per_min
            .filter(|&limit| limit > 0)
            .map(|limit| Duration::from_secs_f64(60.0 / limit as f64));
        Self {
            min_interval,
            next_allowed: Mutex::new(None),
        }
    }

    /// Wait until the next request slot is available.
    pub async fn acquire(&self) {
        let min_interval = match self.min_interval {
            Some(interval) => interval,
            None => return,
        };
        let mut next_allowed = self.next_allowed.lock().await;
        let now = Instant::now();
        let wait = match *next_allowed {
            Some(at) if at > now => at - now,
            _ => Duration::ZERO,
        };
        *next_allowed = Some(now + wait + min_interval);
        drop(next_allowed);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

/// HTTP embedding client (Ollama-style API).
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    /// Concurrent in-flight requests within a batch
    workers: usize,
    max_retries: u32,
    limiter: Arc<RateLimiter>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingsConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(5)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.endpoint.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batching.batch_size.max(1),
            workers: config.batching.workers.max(1),
            max_retries: config.max_retries,
            limiter: Arc::new(RateLimiter::new(config.batching.rate_limit_per_min)),
        }
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let mut last_error: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            self.limiter.acquire().await;
            let request = EmbedRequest {
                model: &self.model,
                prompt: text,
            };
            let outcome = async {
                let response = self
                    .client
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| Error::embed_failed(format!("request failed: {}", e), true))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::embed_failed(
                        format!("HTTP {}", status),
                        status.is_server_error(),
                    ));
                }
                let body: EmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::embed_failed(format!("bad response: {}", e), false))?;
                Ok(body.embedding)
            }
            .await;

            match outcome {
                Ok(vector) => {
                    if vector.len() != self.dimension {
                        return Err(Error::embed_failed(
                            format!(
                                "dimension mismatch: expected {}, got {}",
                                self.dimension,
                                vector.len()
                            ),
                            false,
                        ));
                    }
                    return Ok(vector);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = Duration::from_secs(2u64.pow(attempt));
                    tracing::warn!(
                        "embedding attempt {}/{} failed ({}); retrying in {:?}",
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    last_error = Some(e);
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::embed_failed("exhausted retries", true)))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let non_empty: Vec<&String> = batch
                .iter()
                .filter(|text| !text.trim().is_empty())
                .collect();
            // Up to `workers` requests in flight at once; the shared
            // limiter still spaces them at request granularity.
            for group in non_empty.chunks(self.workers) {
                let futures: Vec<_> = group.iter().map(|text| self.embed_one(text)).collect();
                for result in join_all(futures).await {
                    vectors.push(result?);
                }
            }
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::bad_request("cannot embed an empty query"));
        }
        self.embed_one(text).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::embed_failed(format!("unreachable: {}", e), true))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::embed_failed(
                format!("HTTP {}", response.status()),
                true,
            ))
        }
    }
}
