//! Similarity lookup over embedded chunks.
//!
//! Brute-force cosine ranking of every stored vector; plenty for a
//! personal corpus.

use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::store::FileStore;

const SNIPPET_CHARS: usize = 240;

/// A ranked chunk hit.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMatch {
    pub file_id: String,
    pub chunk_index: i64,
    pub score: f32,
    pub snippet: String,
}

/// Rank all embedded chunks against a query vector.
pub async fn similar_chunks(
    store: &FileStore,
    query: &[f32],
    limit: usize,
) -> Result<Vec<ChunkMatch>> {
    let mut matches: Vec<ChunkMatch> = store
        .embedded_chunks()
        .await?
        .into_iter()
        .map(|(file_id, chunk)| ChunkMatch {
            score: cosine_similarity(query, &chunk.embedding),
            snippet: chunk.text.chars().take(SNIPPET_CHARS).collect(),
            file_id,
            chunk_index: chunk.index,
        })
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(limit);
    Ok(matches)
}
