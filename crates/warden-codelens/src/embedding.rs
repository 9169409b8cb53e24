//! Embedding client for OpenAI-compatible `/embeddings` endpoints.
//!
//! The [`Embedder`] trait is what the comment deduplicator depends on;
//! [`EmbeddingClient`] is the HTTP implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_core::{EmbeddingConfig, WardenError};

/// Turns texts into vectors, one per input, in input order.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use warden_codelens::embedding::Embedder;
/// use warden_core::WardenError;
///
/// struct Lengths;
///
/// #[async_trait]
/// impl Embedder for Lengths {
///     async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, WardenError> {
///         Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
///     }
/// }
/// ```
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encode `texts` into embedding vectors.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Embedding`] if the backing service fails.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, WardenError>;
}

/// Client for an OpenAI-compatible embedding API.
///
/// # Examples
///
/// ```
/// use warden_codelens::embedding::EmbeddingClient;
///
/// let client = EmbeddingClient::new("test-key");
/// assert_eq!(client.model(), "text-embedding-3-small");
/// ```
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const BATCH_SIZE: usize = 64;
const BATCH_DELAY_MS: u64 = 200;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    /// Create a new client with the given API key and default model.
    pub fn new(api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// Falls back to the `OPENAI_API_KEY` env var if no key is configured.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] if no API key is available.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use warden_core::EmbeddingConfig;
    /// use warden_codelens::embedding::EmbeddingClient;
    ///
    /// let client = EmbeddingClient::with_config(&EmbeddingConfig::default()).unwrap();
    /// ```
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, WardenError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                WardenError::Config(
                    "embedding API key not found: set embedding.api_key in .warden.toml \
                     or OPENAI_API_KEY env var"
                        .into(),
                )
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
        })
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn embed_chunk(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, WardenError> {
        let request = EmbedRequest {
            model: &self.model,
            input: batch,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| WardenError::Embedding(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(WardenError::Embedding(format!(
                "embedding API returned {status}: {body}"
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| WardenError::Embedding(format!("failed to parse response: {e}")))?;

        into_ordered(embed_response, batch.len())
    }
}

fn into_ordered(response: EmbedResponse, expected: usize) -> Result<Vec<Vec<f32>>, WardenError> {
    if response.data.len() != expected {
        return Err(WardenError::Embedding(format!(
            "expected {expected} embeddings, got {}",
            response.data.len()
        )));
    }
    let mut data = response.data;
    data.sort_by_key(|item| item.index);
    Ok(data.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl Embedder for EmbeddingClient {
    /// Embed a batch of texts, split into sub-batches of 64 with a short
    /// delay between them for rate limiting.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, WardenError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            if i > 0 {
                tokio::time::sleep(tokio::time::Duration::from_millis(BATCH_DELAY_MS)).await;
            }
            debug!(batch = i, size = batch.len(), model = %self.model, "embedding batch");
            all_embeddings.extend(self.embed_chunk(batch).await?);
        }

        Ok(all_embeddings)
    }
}
