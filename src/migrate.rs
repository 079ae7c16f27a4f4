use sqlx::SqlitePool;

use crate::error::Result;

/// Create the document-store schema idempotently.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Files, keyed by the SHA-256 of their content
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            content BLOB NOT NULL,
            text TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            scope TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks, ordered per file; embedding stays NULL until computed
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            file_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            strategy TEXT NOT NULL,
            overlap_chars INTEGER NOT NULL DEFAULT 0,
            embedding BLOB,
            PRIMARY KEY (file_id, chunk_index),
            FOREIGN KEY (file_id) REFERENCES files(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_scope ON files(scope)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_name ON files(name)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id)")
        .execute(pool)
        .await?;

    Ok(())
}
