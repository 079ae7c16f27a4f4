//! Embedding backend abstraction and implementations.
//!
//! Defines the [`EmbeddingBackend`] trait and concrete implementations:
//! - **[`HttpBackend`]** — calls a remote OpenAI-compatible embeddings API
//!   keyed by a user credential, with batching, retry, and backoff.
//! - **`FastembedBackend`** — runs a model locally via fastembed; no
//!   network calls after the one-time model download (feature
//!   `local-embeddings`).
//! - **[`MockBackend`]** — deterministic in-process backend for tests and
//!   offline development.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`] — compute similarity between two vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for
//!   SQLite BLOB storage
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The HTTP backend uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Transport-level timeouts belong to the backend (reqwest client); the
//! embedding pipeline itself never retries a failed batch.

#[cfg(feature = "local-embeddings")]
pub mod local;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Descriptor for an embedding backend: identity, dimensionality, and the
/// batch-size window it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub id: String,
    pub name: String,
    pub dimensions: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub default_batch_size: usize,
}

/// A source of embedding vectors.
///
/// All of a backend's vectors share `info().dimensions`. `embed_batch`
/// must return one vector per input, in input order.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn info(&self) -> &BackendInfo;

    /// Embed a batch of texts, one vector per input, same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text. Equivalent to `embed_batch(&[text])[0]`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Backend("empty embedding response".into()))
    }
}

/// Create the configured [`EmbeddingBackend`].
///
/// Dispatch is configuration-driven: `provider = "http"` builds an
/// [`HttpBackend`] (credential read from the environment variable named by
/// `api_key_env`), `provider = "local"` builds a `FastembedBackend` when
/// the `local-embeddings` feature is enabled.
pub fn create_backend(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "http" => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                Error::InvalidInput(format!(
                    "environment variable {} not set for the http embedding backend",
                    config.api_key_env
                ))
            })?;
            Ok(Arc::new(HttpBackend::new(config, api_key)?))
        }
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(local::FastembedBackend::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(Error::InvalidInput(
            "local embedding backend requires the local-embeddings feature".into(),
        )),
        "disabled" => Err(Error::InvalidInput(
            "embedding provider is disabled".into(),
        )),
        other => Err(Error::InvalidInput(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ HTTP Backend ============

/// Embedding backend for a remote OpenAI-compatible `/v1/embeddings` API.
///
/// The credential is an explicit constructor argument (typically resolved
/// from the environment by [`create_backend`]), never ambient state.
pub struct HttpBackend {
    info: BackendInfo,
    url: String,
    api_key: String,
    model: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Create a remote backend from configuration plus a user credential.
    ///
    /// # Errors
    ///
    /// Fails when `model` or `dims` is missing from the configuration.
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            Error::InvalidInput("embedding.model required for the http backend".into())
        })?;
        let dims = config.dims.ok_or_else(|| {
            Error::InvalidInput("embedding.dims required for the http backend".into())
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Backend(e.to_string()))?;

        Ok(Self {
            info: BackendInfo {
                id: model.clone(),
                name: "remote-http".to_string(),
                dimensions: dims,
                min_batch_size: 1,
                max_batch_size: 2048,
                default_batch_size: config.batch_size,
            },
            url,
            api_key: api_key.into(),
            model,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": &self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::Backend(e.to_string()))?;
                        return parse_embeddings_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(Error::Backend(format!(
                            "embedding API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(Error::Backend(format!(
                        "embedding API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::Backend(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Backend("embedding failed after retries".into())))
    }
}

/// Parse an OpenAI-shaped embeddings response.
///
/// Extracts the `data[].embedding` arrays and returns them in order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Backend("invalid embeddings response: missing data array".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::Backend("invalid embeddings response: missing embedding".into())
            })?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Mock Backend ============

/// Deterministic in-process backend for tests.
///
/// Vectors are derived from a SHA-256 of the input text, so identical
/// texts always embed identically. Supports scripting a failure at the
/// Nth `embed_batch` call and counting calls for assertions.
pub struct MockBackend {
    info: BackendInfo,
    calls: AtomicUsize,
    fail_at_call: Option<usize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            info: BackendInfo {
                id: "mock".to_string(),
                name: "mock".to_string(),
                dimensions: 8,
                min_batch_size: 1,
                max_batch_size: 16,
                default_batch_size: 4,
            },
            calls: AtomicUsize::new(0),
            fail_at_call: None,
        }
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.info.dimensions = dimensions;
        self
    }

    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.info.default_batch_size = batch_size;
        self
    }

    /// Fail the Nth `embed_batch` call (1-based) with a backend error.
    pub fn with_failure_at_call(mut self, call: usize) -> Self {
        self.fail_at_call = Some(call);
        self
    }

    /// Number of `embed_batch` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at_call == Some(call) {
            return Err(Error::Backend(format!("scripted failure at call {}", call)));
        }
        Ok(texts
            .iter()
            .map(|t| deterministic_vector(t, self.info.dimensions))
            .collect())
    }
}

/// Hash-derived pseudo-embedding in `[-1, 1]`.
fn deterministic_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    (0..dimensions)
        .map(|i| {
            let byte = digest[i % digest.len()];
            (byte as f32 / 255.0) * 2.0 - 1.0
        })
        .collect()
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
