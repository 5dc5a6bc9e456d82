//! Chat model clients
//!
//! Primary and fallback answers go through the same `ChatModel` seam; the
//! HTTP implementation talks to an Ollama-style completion API with
//! bounded generation parameters and retry with exponential backoff.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::ChatEndpoint;
use crate::error::{Error, Result};

/// Chat completion seam.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a completion for `prompt`, bounded by `max_output_tokens`.
    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<String>;

    /// Probe upstream availability.
    async fn health(&self) -> Result<()>;

    /// Model identifier for logs and healthz.
    fn model(&self) -> &str;
}

/// HTTP chat client.
pub struct HttpChatModel {
    client: Client,
    config: ChatEndpoint,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl HttpChatModel {
    pub fn new(config: ChatEndpoint) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(5)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        let url = format!("{}/api/generate", self.config.base_url);
        let mut last_error: Option<Error> = None;

        for attempt in 0..=self.config.max_retries {
            let request = GenerateRequest {
                model: &self.config.model,
                prompt,
                stream: false,
                options: GenerateOptions {
                    temperature: self.config.temperature,
                    num_predict: max_output_tokens,
                },
            };
            let outcome = async {
                let response = self
                    .client
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| Error::llm_failed(format!("request failed: {}", e), true))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::llm_failed(
                        format!("HTTP {}", status),
                        status.is_server_error(),
                    ));
                }
                let body: GenerateResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::llm_failed(format!("bad response: {}", e), false))?;
                Ok(body.response)
            }
            .await;

            match outcome {
                Ok(answer) => return Ok(answer),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = Duration::from_secs(2u64.pow(attempt));
                    tracing::warn!(
                        "chat attempt {}/{} failed ({}); retrying in {:?}",
                        attempt + 1,
                        self.config.max_retries + 1,
                        e,
                        delay
                    );
                    last_error = Some(e);
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::llm_failed("exhausted retries", true)))
    }

    async fn health(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::llm_failed(format!("unreachable: {}", e), true))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::llm_failed(format!("HTTP {}", response.status()), true))
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
