//! Lazy synchronization of content-store data into the query engine.
//!
//! A query may reference a reserved logical table (e.g. `files`) before
//! the engine has ever seen it. The bridge intercepts exactly the
//! recognized "missing table" error shape for names on the
//! synchronizable list, pushes the current content-store rows into the
//! engine, and re-issues the original query once. Any other error, or a
//! second failure after the resync, propagates unchanged.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::{missing_relation, QueryEngine, QueryRows};
use crate::error::{Error, Result};
use crate::store::FileStore;

/// Logical schema the synchronized tables live under.
pub const ENGINE_SCHEMA: &str = "satchel";

/// Reserved logical tables the bridge can rebuild from the content store.
pub const SYNCABLE_TABLES: &[&str] = &["files"];

/// Column order of the synchronized `files` table.
fn file_columns() -> Vec<String> {
    ["id", "name", "mime_type", "size_bytes", "scope", "created_at"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

/// Query front-end with lazy resync-on-miss.
pub struct QueryBridge {
    store: Arc<FileStore>,
    engine: Arc<dyn QueryEngine>,
}

impl QueryBridge {
    pub fn new(store: Arc<FileStore>, engine: Arc<dyn QueryEngine>) -> Self {
        Self { store, engine }
    }

    /// Run a query against the engine.
    ///
    /// On the recognized missing-table shape for a synchronizable table,
    /// the bridge syncs that table and retries the query exactly once —
    /// never more.
    pub async fn query(&self, sql: &str) -> Result<QueryRows> {
        match self.engine.query(sql).await {
            Ok(rows) => Ok(rows),
            Err(Error::EngineQuery(message)) => match missing_relation(&message) {
                Some(table) if SYNCABLE_TABLES.contains(&table.as_str()) => {
                    warn!(table = %table, "bridge: table missing from engine, resyncing");
                    self.sync_table(&table).await?;
                    self.engine.query(sql).await
                }
                _ => Err(Error::EngineQuery(message)),
            },
            Err(other) => Err(other),
        }
    }

    /// Push the current content-store rows for `table` into the engine,
    /// replacing whatever the engine held before.
    ///
    /// Not reentrant-safe against concurrent writers: a store mutation
    /// racing the resync may leave a stale snapshot until the next miss.
    pub async fn sync_table(&self, table: &str) -> Result<()> {
        if !SYNCABLE_TABLES.contains(&table) {
            return Err(Error::InvalidInput(format!(
                "table '{}' is not synchronizable",
                table
            )));
        }

        self.engine.ensure_schema(ENGINE_SCHEMA).await?;
        let rows = self.file_rows().await?;
        let columns = file_columns();
        self.engine.load_table(table, &columns, &rows).await?;
        debug!(table = %table, rows = rows.len(), "bridge: synced table into engine");
        Ok(())
    }

    /// Serialize every stored file into one JSON record per row.
    async fn file_rows(&self) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(|f| {
                serde_json::json!({
                    "id": f.id,
                    "name": f.name,
                    "mime_type": f.mime_type,
                    "size_bytes": f.size_bytes,
                    "scope": f.scope,
                    "created_at": f.created_at,
                })
            })
            .collect())
    }
}
