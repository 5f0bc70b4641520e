//! Embedding module - text vectorization through Ollama
//!
//! ## Usage
//! ```rust,ignore
//! let embedder = create_embedder(&config.ollama, config.store.dimension)?;
//! let embedding = embedder.embed("How do I subscribe to a report?").await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::OllamaConfig;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// Text to vector conversion
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts (default: one call each, in order)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Vector width
    fn dimension(&self) -> usize;

    /// Model name
    fn name(&self) -> &str;
}

// ============================================================================
// Ollama Embedding
// ============================================================================

/// Retries after the first attempt for transport errors, 429 and 503
const MAX_RETRIES: u32 = 3;
/// Backoff before the first retry, doubled each time
const INITIAL_BACKOFF_MS: u64 = 500;

/// Ollama `/api/embeddings` client
/// source: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-embeddings
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    endpoint: String,
    model: String,
    client: reqwest::Client,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Ollama error body
#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaEmbedding {
    /// Create a client
    ///
    /// # Arguments
    /// * `base_url` - Ollama server, e.g. `http://localhost:11434`
    /// * `model` - embedding model name
    /// * `dimension` - expected vector width
    /// * `timeout` - per-request timeout
    pub fn new(base_url: &str, model: &str, dimension: usize, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            anyhow::bail!("Embedding model name is empty");
        }
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        let base = url::Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .with_context(|| format!("Invalid Ollama URL: {}", base_url))?;
        let endpoint = base
            .join("api/embeddings")
            .context("Failed to build embeddings endpoint")?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint,
            model: model.to_string(),
            client,
            dimension,
        })
    }

    fn check_dimension(&self, embedding: Vec<f32>) -> Result<Vec<f32>> {
        if embedding.len() != self.dimension {
            anyhow::bail!(
                "Model {} returned {} dimensions, expected {}",
                self.model,
                embedding.len(),
                self.dimension
            );
        }
        Ok(embedding)
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt))
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            let response = match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff(attempt),
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                return self.check_dimension(parsed.embedding);
            }

            // busy or loading the model
            if status.as_u16() == 429 || status.as_u16() == 503 {
                tracing::warn!(
                    "Ollama busy ({}), backing off {:?} (attempt {}/{})",
                    status,
                    backoff(attempt),
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Ollama busy ({})", status));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
            } else {
                if let Ok(error) = serde_json::from_str::<OllamaError>(&body) {
                    anyhow::bail!("Ollama embedding error ({}): {}", status, error.error);
                }
                anyhow::bail!("Ollama embedding error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding {}/{}", i + 1, texts.len());
            results.push(self.embed(text).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// Build the configured embedder, falling back to the fallback model
pub fn create_embedder(config: &OllamaConfig, dimension: usize) -> Result<OllamaEmbedding> {
    let timeout = Duration::from_secs(config.timeout_secs);

    let embedder = match OllamaEmbedding::new(
        &config.base_url,
        &config.embedding_model,
        dimension,
        timeout,
    ) {
        Ok(embedder) => embedder,
        Err(e) => {
            tracing::error!(
                "Error initializing embeddings ({}): {:#}, falling back to {}",
                config.embedding_model,
                e,
                config.fallback_embedding_model
            );
            OllamaEmbedding::new(
                &config.base_url,
                &config.fallback_embedding_model,
                dimension,
                timeout,
            )
            .context("Fallback embedding model unavailable")?
        }
    };

    tracing::info!(
        "Using Ollama embedding {} (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
