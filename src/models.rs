//! Core data models for satchel.
//!
//! These types represent the files and chunks that flow through the
//! storage, chunking, and embedding pipeline.

use serde::Serialize;

/// Chunking strategy label recorded on every chunk produced by
/// [`chunk`](crate::chunk::chunk).
pub const CHUNK_STRATEGY: &str = "paragraph-overlap";

/// Descriptor for a file about to enter the store.
///
/// The store derives the record id from `content`; everything else is
/// caller-supplied presentation metadata.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
    pub text: Option<String>,
    pub metadata: serde_json::Value,
    pub scope: String,
}

impl NewFile {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content: content.into(),
            text: None,
            metadata: serde_json::json!({}),
            scope: String::new(),
        }
    }

    /// Attach extracted plain text at creation time.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Place the file in a listing scope (e.g. a conversation id).
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A stored file. `id` is the lowercase hex SHA-256 of `content` and the
/// sole primary key, so byte-identical uploads collapse to one record.
///
/// Content is immutable once stored; different bytes always produce a new
/// record. `name`, `text`, `metadata`, and `chunks` may be enriched in
/// place after creation.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub content: Vec<u8>,
    pub text: Option<String>,
    pub metadata: serde_json::Value,
    pub chunks: Vec<Chunk>,
    pub scope: String,
    pub created_at: i64,
}

impl StoredFile {
    pub fn has_chunks(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// True once every chunk carries a vector.
    pub fn is_embedded(&self) -> bool {
        self.has_chunks() && self.chunks.iter().all(|c| !c.embedding.is_empty())
    }
}

/// A bounded, overlap-aware span of a file's text, sized for embedding.
///
/// `index` always equals the chunk's position in the file's list.
/// `overlap_chars` is the length (in characters) of the prefix carried
/// over from the previous chunk's tail; `embedding` stays empty until the
/// pipeline fills it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub index: i64,
    pub text: String,
    pub strategy: String,
    pub overlap_chars: usize,
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn new(index: i64, text: impl Into<String>, overlap_chars: usize) -> Self {
        Self {
            index,
            text: text.into(),
            strategy: CHUNK_STRATEGY.to_string(),
            overlap_chars,
            embedding: Vec::new(),
        }
    }

    /// Span length in characters.
    pub fn length(&self) -> usize {
        self.text.chars().count()
    }
}
