//! Content-addressed file store.
//!
//! Files are keyed by the SHA-256 of their content, so byte-identical
//! uploads collapse to a single record no matter how often or under which
//! name they arrive. Creation is idempotent: the insert is
//! `ON CONFLICT(id) DO NOTHING` followed by a read, which makes the
//! hash-check-insert atomic per id at the database level — concurrent
//! same-content calls cannot create duplicates, and an existing record is
//! returned unchanged.
//!
//! Enrichment (`set_text`, `set_metadata`, `set_chunks`) is field-level:
//! sibling fields are never clobbered.

use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{Chunk, NewFile, StoredFile};

/// Compute the content id (lowercase hex SHA-256) for a byte payload.
pub fn content_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Repository over the document-store database.
#[derive(Clone)]
pub struct FileStore {
    pool: SqlitePool,
}

impl FileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Store a file, deduplicating by content hash.
    ///
    /// If a record with the same content already exists it is returned
    /// unchanged — its name, scope, metadata, text, and chunks are not
    /// overwritten.
    pub async fn find_or_create(&self, file: NewFile) -> Result<StoredFile> {
        validate_name(&file.name)?;
        validate_mime(&file.mime_type)?;

        let id = content_id(&file.content);
        let metadata_json = serde_json::to_string(&file.metadata)?;
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO files (id, name, mime_type, size_bytes, content, text, metadata_json, scope, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&file.name)
        .bind(&file.mime_type)
        .bind(file.content.len() as i64)
        .bind(&file.content)
        .bind(&file.text)
        .bind(&metadata_json)
        .bind(&file.scope)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(id = %id, name = %file.name, "store: deduplicated upload");
        } else {
            debug!(id = %id, name = %file.name, size = file.content.len(), "store: created file");
        }

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| Error::NotFound(id))
    }

    /// Fetch a full file record (including chunks) by id.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<StoredFile>> {
        let row = sqlx::query(
            "SELECT id, name, mime_type, size_bytes, content, text, metadata_json, scope, created_at FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut file = file_from_row(&row);
        file.chunks = self.load_chunks(id).await?;
        Ok(Some(file))
    }

    /// Hash the payload and look the record up by content id.
    pub async fn find_by_content(&self, bytes: &[u8]) -> Result<Option<StoredFile>> {
        self.find_by_id(&content_id(bytes)).await
    }

    /// Delete a file and its chunks. No reference counting.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        tx.commit().await?;
        debug!(id = %id, "store: deleted file");
        Ok(())
    }

    /// Re-attach the same bytes under a different display name.
    pub async fn rename(&self, id: &str, name: &str) -> Result<()> {
        validate_name(name)?;
        let result = sqlx::query("UPDATE files SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Attach extracted text to an existing record.
    pub async fn set_text(&self, id: &str, text: &str) -> Result<()> {
        let result = sqlx::query("UPDATE files SET text = ? WHERE id = ?")
            .bind(text)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Set one metadata key, leaving every other key and field untouched.
    pub async fn set_metadata(&self, id: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let current: Option<String> =
            sqlx::query_scalar("SELECT metadata_json FROM files WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            return Err(Error::NotFound(id.to_string()));
        };

        let mut metadata: serde_json::Value =
            serde_json::from_str(&current).unwrap_or(serde_json::json!({}));
        if let Some(object) = metadata.as_object_mut() {
            object.insert(key.to_string(), value);
        } else {
            let mut object = serde_json::Map::new();
            object.insert(key.to_string(), value);
            metadata = serde_json::Value::Object(object);
        }

        sqlx::query("UPDATE files SET metadata_json = ? WHERE id = ?")
            .bind(serde_json::to_string(&metadata)?)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replace the full chunk list for a file in one transaction.
    pub async fn set_chunks(&self, id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(Error::NotFound(id.to_string()));
        }

        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let blob = if chunk.embedding.is_empty() {
                None
            } else {
                Some(vec_to_blob(&chunk.embedding))
            };
            sqlx::query(
                "INSERT INTO chunks (file_id, chunk_index, text, strategy, overlap_chars, embedding) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(chunk.index)
            .bind(&chunk.text)
            .bind(&chunk.strategy)
            .bind(chunk.overlap_chars as i64)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(id = %id, chunks = chunks.len(), "store: replaced chunk list");
        Ok(())
    }

    /// Persist one batch of vectors, addressed by chunk index.
    pub async fn set_chunk_embeddings(&self, id: &str, vectors: &[(i64, Vec<f32>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (index, vector) in vectors {
            let result =
                sqlx::query("UPDATE chunks SET embedding = ? WHERE file_id = ? AND chunk_index = ?")
                    .bind(vec_to_blob(vector))
                    .bind(id)
                    .bind(index)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("chunk {} of file {}", index, id)));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// All files in a listing scope, name-ordered.
    pub async fn list(&self, scope: &str) -> Result<Vec<StoredFile>> {
        let rows = sqlx::query(
            "SELECT id, name, mime_type, size_bytes, content, text, metadata_json, scope, created_at FROM files WHERE scope = ? ORDER BY name ASC",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_rows(rows).await
    }

    /// Every stored file, across all scopes.
    pub async fn list_all(&self) -> Result<Vec<StoredFile>> {
        let rows = sqlx::query(
            "SELECT id, name, mime_type, size_bytes, content, text, metadata_json, scope, created_at FROM files ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_rows(rows).await
    }

    /// All chunks that already carry a vector, with their owning file id.
    pub(crate) async fn embedded_chunks(&self) -> Result<Vec<(String, Chunk)>> {
        let rows = sqlx::query(
            "SELECT file_id, chunk_index, text, strategy, overlap_chars, embedding FROM chunks WHERE embedding IS NOT NULL ORDER BY file_id, chunk_index",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("file_id"), chunk_from_row(row)))
            .collect())
    }

    async fn hydrate_rows(&self, rows: Vec<SqliteRow>) -> Result<Vec<StoredFile>> {
        let mut files = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut file = file_from_row(row);
            file.chunks = self.load_chunks(&file.id).await?;
            files.push(file);
        }
        Ok(files)
    }

    async fn load_chunks(&self, id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT chunk_index, text, strategy, overlap_chars, embedding FROM chunks WHERE file_id = ? ORDER BY chunk_index ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }
}

fn file_from_row(row: &SqliteRow) -> StoredFile {
    let metadata_json: String = row.get("metadata_json");
    let metadata = serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({}));
    StoredFile {
        id: row.get("id"),
        name: row.get("name"),
        mime_type: row.get("mime_type"),
        size_bytes: row.get("size_bytes"),
        content: row.get("content"),
        text: row.get("text"),
        metadata,
        chunks: Vec::new(),
        scope: row.get("scope"),
        created_at: row.get("created_at"),
    }
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    let blob: Option<Vec<u8>> = row.get("embedding");
    let overlap: i64 = row.get("overlap_chars");
    Chunk {
        index: row.get("chunk_index"),
        text: row.get("text"),
        strategy: row.get("strategy"),
        overlap_chars: overlap as usize,
        embedding: blob.map(|b| blob_to_vec(&b)).unwrap_or_default(),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("file name must not be empty".into()));
    }
    Ok(())
}

fn validate_mime(mime: &str) -> Result<()> {
    let mut parts = mime.split('/');
    let (Some(ty), Some(sub), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::InvalidInput(format!(
            "mime type must be shaped type/subtype, got '{}'",
            mime
        )));
    };
    if ty.is_empty() || sub.is_empty() || mime.contains(char::is_whitespace) {
        return Err(Error::InvalidInput(format!(
            "mime type must be shaped type/subtype, got '{}'",
            mime
        )));
    }
    Ok(())
}
