//! Embedding pipeline: fill a file's chunks with vectors, batch by batch.
//!
//! Batches run strictly sequentially and every batch is persisted before
//! the next one starts, so a failure (or crash) mid-run loses nothing
//! already written. The backend is always an explicit argument — there is
//! no ambient "current backend" state.

use tracing::debug;

use crate::chunk::{chunk, needs_chunking, ChunkPolicy};
use crate::embedding::EmbeddingBackend;
use crate::error::{Error, Result};
use crate::models::Chunk;
use crate::store::FileStore;

/// Metadata key stamped on a file once all of its chunks are embedded.
pub const EMBEDDING_METADATA_KEY: &str = "embedding";

/// Split a file's extracted text and replace its stored chunk list.
///
/// Texts below the chunking minimum are stored as a single chunk and
/// embedded as one unit. Returns the number of chunks written.
pub async fn chunk_file(store: &FileStore, file_id: &str, policy: &ChunkPolicy) -> Result<usize> {
    let file = store
        .find_by_id(file_id)
        .await?
        .ok_or_else(|| Error::NotFound(file_id.to_string()))?;
    let text = file.text.as_deref().unwrap_or("");
    if text.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "file {} has no extracted text to chunk",
            file_id
        )));
    }

    let chunks = if needs_chunking(text) {
        chunk(text, policy)
    } else {
        vec![Chunk::new(0, text, 0)]
    };
    store.set_chunks(file_id, &chunks).await?;
    debug!(file = %file_id, chunks = chunks.len(), "pipeline: chunked file text");
    Ok(chunks.len())
}

/// Generate one vector per chunk of `file_id` using `backend`.
///
/// Chunks that already carry a vector are skipped, so re-invoking after a
/// partial failure resumes with the first unembedded chunk instead of
/// recomputing finished work. `batch_size` overrides the backend's
/// default and is clamped to its `[min_batch_size, max_batch_size]`.
///
/// # Errors
///
/// - `InvalidInput` when the file has no chunks.
/// - `NotFound` when the file does not exist.
/// - `Backend` when a batch call fails or returns the wrong number or
///   shape of vectors; batches persisted before the failure stay durable.
pub async fn generate_embeddings(
    store: &FileStore,
    file_id: &str,
    backend: &dyn EmbeddingBackend,
    batch_size: Option<usize>,
) -> Result<()> {
    let file = store
        .find_by_id(file_id)
        .await?
        .ok_or_else(|| Error::NotFound(file_id.to_string()))?;
    if !file.has_chunks() {
        return Err(Error::InvalidInput(format!(
            "file {} has no chunks to embed",
            file_id
        )));
    }

    let info = backend.info();
    let batch_size = batch_size
        .unwrap_or(info.default_batch_size)
        .clamp(info.min_batch_size, info.max_batch_size);

    let pending: Vec<_> = file
        .chunks
        .iter()
        .filter(|c| c.embedding.is_empty())
        .collect();
    let total_batches = pending.len().div_ceil(batch_size);

    for (batch_no, window) in pending.chunks(batch_size).enumerate() {
        let texts: Vec<String> = window.iter().map(|c| c.text.clone()).collect();
        let vectors = backend.embed_batch(&texts).await?;

        if vectors.len() != texts.len() {
            return Err(Error::Backend(format!(
                "backend returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &vectors {
            if vector.len() != info.dimensions {
                return Err(Error::Backend(format!(
                    "backend returned a vector of length {}, expected {}",
                    vector.len(),
                    info.dimensions
                )));
            }
        }

        let writes: Vec<(i64, Vec<f32>)> =
            window.iter().map(|c| c.index).zip(vectors).collect();
        store.set_chunk_embeddings(file_id, &writes).await?;
        debug!(
            file = %file_id,
            batch = batch_no + 1,
            total = total_batches,
            size = writes.len(),
            "pipeline: batch persisted"
        );
    }

    store
        .set_metadata(
            file_id,
            EMBEDDING_METADATA_KEY,
            serde_json::json!({
                "backend": info.id.clone(),
                "dimensions": info.dimensions,
                "completed_at": chrono::Utc::now().to_rfc3339(),
            }),
        )
        .await?;

    Ok(())
}
