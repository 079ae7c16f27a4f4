//! Locally-loaded embedding backend (fastembed).
//!
//! The model is downloaded once from Hugging Face and cached; after that,
//! embedding runs entirely offline. Loading is lazy, memoized, and
//! single-flight: the first caller triggers initialization and concurrent
//! callers await the same in-flight result.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{BackendInfo, EmbeddingBackend};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

pub struct FastembedBackend {
    info: BackendInfo,
    model_kind: fastembed::EmbeddingModel,
    cell: OnceCell<Arc<Mutex<fastembed::TextEmbedding>>>,
}

impl FastembedBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let dims = config.dims.unwrap_or_else(|| default_dims(&model_name));
        let model_kind = resolve_model(&model_name)?;

        Ok(Self {
            info: BackendInfo {
                id: model_name.clone(),
                name: "local-fastembed".to_string(),
                dimensions: dims,
                min_batch_size: 1,
                max_batch_size: 256,
                default_batch_size: config.batch_size.min(256),
            },
            model_kind,
            cell: OnceCell::new(),
        })
    }

    /// Lazy model load. `OnceCell` guarantees a single in-flight
    /// initialization shared by racing first callers; a failed load leaves
    /// the cell empty so the next call can try again.
    async fn model(&self) -> Result<Arc<Mutex<fastembed::TextEmbedding>>> {
        let model = self
            .cell
            .get_or_try_init(|| async {
                let kind = self.model_kind.clone();
                debug!(model = %self.info.id, "loading local embedding model");
                let loaded = tokio::task::spawn_blocking(move || {
                    fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(kind)).map_err(
                        |e| {
                            Error::Backend(format!(
                                "failed to initialize local embedding model: {}",
                                e
                            ))
                        },
                    )
                })
                .await
                .map_err(|e| Error::Backend(e.to_string()))??;
                Ok::<_, Error>(Arc::new(Mutex::new(loaded)))
            })
            .await?;
        Ok(model.clone())
    }
}

#[async_trait]
impl EmbeddingBackend for FastembedBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model().await?;
        let texts = texts.to_vec();
        let batch_size = self.info.default_batch_size;

        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| Error::Backend("local model mutex poisoned".into()))?;
            guard
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::Backend(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::Backend(e.to_string()))?
    }
}

fn resolve_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(Error::InvalidInput(format!(
            "unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

fn default_dims(name: &str) -> usize {
    match name {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    }
}
