//! Analytical query engine abstraction.
//!
//! The chat client lets users run SQL over their own data. The engine is
//! a separate storage backend with its own file namespace and its own
//! lifecycle; this module defines the [`QueryEngine`] trait the rest of
//! the crate consumes, the [`missing_relation`] parser for the
//! recognizable "object does not exist" error shape, and the embedded
//! [`SqliteEngine`] implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};

/// Tabular query result.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// A file living in the engine's own namespace.
#[derive(Debug, Clone)]
pub struct EngineFile {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// SQL-capable storage backend with its own file namespace.
///
/// Implementations must surface query failures as
/// [`Error::EngineQuery`] so callers can inspect the message for the
/// missing-table shape.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Run a SQL query and return its rows.
    async fn query(&self, sql: &str) -> Result<QueryRows>;

    /// Make sure the logical schema exists before tables are loaded into it.
    async fn ensure_schema(&self, schema: &str) -> Result<()>;

    /// Create (or replace) a named logical table from serialized records.
    ///
    /// `columns` fixes the column order; each record is a JSON object
    /// keyed by column name. Missing keys become NULL.
    async fn load_table(
        &self,
        table: &str,
        columns: &[String],
        rows: &[serde_json::Value],
    ) -> Result<()>;

    /// Enumerate the engine's own file namespace.
    async fn list_files(&self) -> Result<Vec<EngineFile>>;

    /// Read an engine-native file's content.
    async fn read_file(&self, name: &str) -> Result<Vec<u8>>;

    /// Store an engine-native file.
    async fn put_file(&self, name: &str, mime_type: &str, content: &[u8]) -> Result<()>;

    /// Delete an engine-native file.
    async fn delete_file(&self, name: &str) -> Result<()>;
}

/// Parse the recognizable "object does not exist" error shapes and return
/// the missing table's name.
///
/// Understood shapes: SQLite's `no such table: t` and the
/// `relation "t" does not exist` wording used by Postgres-dialect engines.
pub fn missing_relation(message: &str) -> Option<String> {
    if let Some(rest) = message.split("no such table: ").nth(1) {
        let name: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .collect();
        if !name.is_empty() {
            return Some(name);
        }
    }

    if let Some(idx) = message.find("relation \"") {
        let rest = &message[idx + "relation \"".len()..];
        if let Some(end) = rest.find('"') {
            if end > 0 && rest[end..].contains("does not exist") {
                return Some(rest[..end].to_string());
            }
        }
    }

    None
}

/// Embedded SQLite-backed query engine.
///
/// The pool is initialized lazily on first use; `OnceCell` makes the
/// initialization single-flight, so racing first callers share one worker
/// startup and its result.
pub struct SqliteEngine {
    path: Option<PathBuf>,
    pool: OnceCell<SqlitePool>,
}

impl SqliteEngine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            pool: OnceCell::new(),
        }
    }

    /// Purely in-memory engine (single connection, kept alive for the
    /// engine's lifetime).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .get_or_try_init(|| async {
                debug!("engine: initializing");
                let options = match &self.path {
                    Some(path) => {
                        if let Some(parent) = path.parent() {
                            std::fs::create_dir_all(parent)
                                .map_err(|e| Error::EngineQuery(e.to_string()))?;
                        }
                        SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
                            .map_err(|e| Error::EngineQuery(e.to_string()))?
                            .create_if_missing(true)
                    }
                    None => SqliteConnectOptions::new().in_memory(true),
                };

                // A pooled in-memory database must keep its one connection
                // alive, or the data vanishes with it.
                let pool = SqlitePoolOptions::new()
                    .max_connections(if self.path.is_some() { 5 } else { 1 })
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await
                    .map_err(|e| Error::EngineQuery(e.to_string()))?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS engine_files (
                        name TEXT PRIMARY KEY,
                        mime_type TEXT NOT NULL,
                        content BLOB NOT NULL,
                        created_at INTEGER NOT NULL
                    )
                    "#,
                )
                .execute(&pool)
                .await
                .map_err(|e| Error::EngineQuery(e.to_string()))?;

                Ok(pool)
            })
            .await
    }
}

#[async_trait]
impl QueryEngine for SqliteEngine {
    async fn query(&self, sql: &str) -> Result<QueryRows> {
        let pool = self.pool().await?;
        let rows = sqlx::query(sql)
            .fetch_all(pool)
            .await
            .map_err(|e| Error::EngineQuery(e.to_string()))?;

        let columns = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            None => Vec::new(),
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(row_to_values(row)?);
        }

        Ok(QueryRows { columns, rows: out })
    }

    /// SQLite has a single namespace, so there is no schema object to
    /// create; the operation exists for engines with real schemas.
    async fn ensure_schema(&self, schema: &str) -> Result<()> {
        validate_ident(schema)?;
        self.pool().await?;
        Ok(())
    }

    async fn load_table(
        &self,
        table: &str,
        columns: &[String],
        rows: &[serde_json::Value],
    ) -> Result<()> {
        validate_ident(table)?;
        if columns.is_empty() {
            return Err(Error::InvalidInput(
                "load_table requires at least one column".into(),
            ));
        }

        let pool = self.pool().await?;
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| Error::EngineQuery(e.to_string()))?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::EngineQuery(e.to_string()))?;

        let col_defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(c), column_affinity(c, rows)))
            .collect();
        sqlx::query(&format!(
            "CREATE TABLE {} ({})",
            quote_ident(table),
            col_defs.join(", ")
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::EngineQuery(e.to_string()))?;

        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders
        );

        for row in rows {
            let mut query = sqlx::query(&insert_sql);
            for col in columns {
                query = match row.get(col) {
                    None | Some(serde_json::Value::Null) => query.bind(Option::<String>::None),
                    Some(serde_json::Value::Bool(b)) => query.bind(*b as i64),
                    Some(serde_json::Value::Number(n)) => {
                        if let Some(i) = n.as_i64() {
                            query.bind(i)
                        } else {
                            query.bind(n.as_f64().unwrap_or(0.0))
                        }
                    }
                    Some(serde_json::Value::String(s)) => query.bind(s.clone()),
                    Some(other) => query.bind(other.to_string()),
                };
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::EngineQuery(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::EngineQuery(e.to_string()))?;
        debug!(table = %table, rows = rows.len(), "engine: loaded table");
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<EngineFile>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT name, mime_type, length(content) AS size_bytes FROM engine_files ORDER BY name ASC",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| Error::EngineQuery(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| EngineFile {
                name: row.get("name"),
                mime_type: row.get("mime_type"),
                size_bytes: row.get("size_bytes"),
            })
            .collect())
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let pool = self.pool().await?;
        let content: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT content FROM engine_files WHERE name = ?")
                .bind(name)
                .fetch_optional(pool)
                .await
                .map_err(|e| Error::EngineQuery(e.to_string()))?;
        content.ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn put_file(&self, name: &str, mime_type: &str, content: &[u8]) -> Result<()> {
        let pool = self.pool().await?;
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO engine_files (name, mime_type, content, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                mime_type = excluded.mime_type,
                content = excluded.content,
                created_at = excluded.created_at
            "#,
        )
        .bind(name)
        .bind(mime_type)
        .bind(content)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|e| Error::EngineQuery(e.to_string()))?;
        Ok(())
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM engine_files WHERE name = ?")
            .bind(name)
            .execute(pool)
            .await
            .map_err(|e| Error::EngineQuery(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(name.to_string()));
        }
        Ok(())
    }
}

fn row_to_values(row: &SqliteRow) -> Result<Vec<serde_json::Value>> {
    let map_err = |e: sqlx::Error| Error::EngineQuery(e.to_string());
    let mut out = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let raw = row.try_get_raw(i).map_err(map_err)?;
        let value = if raw.is_null() {
            serde_json::Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => serde_json::json!(row.try_get::<i64, _>(i).map_err(map_err)?),
                "REAL" => serde_json::json!(row.try_get::<f64, _>(i).map_err(map_err)?),
                "BLOB" => {
                    serde_json::json!(BASE64.encode(row.try_get::<Vec<u8>, _>(i).map_err(map_err)?))
                }
                _ => serde_json::json!(row.try_get::<String, _>(i).map_err(map_err)?),
            }
        };
        out.push(value);
    }
    Ok(out)
}

/// Pick a column affinity from the first non-null value under that key.
fn column_affinity(column: &str, rows: &[serde_json::Value]) -> &'static str {
    for row in rows {
        match row.get(column) {
            Some(serde_json::Value::Number(n)) => {
                return if n.as_i64().is_some() { "INTEGER" } else { "REAL" };
            }
            Some(serde_json::Value::Bool(_)) => return "INTEGER",
            Some(serde_json::Value::String(_)) => return "TEXT",
            Some(serde_json::Value::Null) | None => continue,
            Some(_) => return "TEXT",
        }
    }
    "TEXT"
}

fn validate_ident(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if !ok {
        return Err(Error::InvalidInput(format!(
            "invalid identifier: '{}'",
            name
        )));
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
