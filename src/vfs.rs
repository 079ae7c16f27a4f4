//! Virtual filesystem over heterogeneous storage backends.
//!
//! Application code lists, reads, and deletes "files" without knowing
//! whether they live in the content store or in the query engine's own
//! namespace. The merged listing is keyed by name; on a collision the
//! content-store version always wins.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::engine::QueryEngine;
use crate::error::{Error, Result};
use crate::store::FileStore;

/// Which backend produced a [`VirtualFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileOrigin {
    Store,
    Engine,
}

/// Read-through projection of a file from either backend.
///
/// Owns no storage itself; `id` is the content hash for store-backed
/// files and the name for engine-native ones.
#[derive(Debug, Clone, Serialize)]
pub struct VirtualFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub origin: FileOrigin,
}

impl VirtualFile {
    /// Scheme-tagged URL naming the producing backend.
    pub fn access_url(&self) -> String {
        match self.origin {
            FileOrigin::Store => format!("satchel://files/{}", self.id),
            FileOrigin::Engine => format!("engine://files/{}", self.name),
        }
    }
}

/// Unified file view over the content store and the query engine.
pub struct VirtualFs {
    store: Arc<FileStore>,
    engine: Arc<dyn QueryEngine>,
}

impl VirtualFs {
    pub fn new(store: Arc<FileStore>, engine: Arc<dyn QueryEngine>) -> Self {
        Self { store, engine }
    }

    /// Merged, name-sorted listing for a scope.
    ///
    /// Engine-native files are enumerated first into a name-keyed map,
    /// then content-store files overwrite by name — deterministic
    /// precedence for the store.
    pub async fn list(&self, scope: &str) -> Result<Vec<VirtualFile>> {
        let mut merged: BTreeMap<String, VirtualFile> = BTreeMap::new();

        for file in self.engine.list_files().await? {
            merged.insert(
                file.name.clone(),
                VirtualFile {
                    id: file.name.clone(),
                    name: file.name,
                    mime_type: file.mime_type,
                    size_bytes: file.size_bytes,
                    origin: FileOrigin::Engine,
                },
            );
        }

        for file in self.store.list(scope).await? {
            merged.insert(
                file.name.clone(),
                VirtualFile {
                    id: file.id,
                    name: file.name,
                    mime_type: file.mime_type,
                    size_bytes: file.size_bytes,
                    origin: FileOrigin::Store,
                },
            );
        }

        Ok(merged.into_values().collect())
    }

    /// Look a file up by name in the merged view.
    pub async fn get(&self, name: &str, scope: &str) -> Result<VirtualFile> {
        self.list(scope)
            .await?
            .into_iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Fetch a file's content from whichever backend holds it.
    pub async fn read(&self, file: &VirtualFile) -> Result<Vec<u8>> {
        match file.origin {
            FileOrigin::Store => self
                .store
                .find_by_id(&file.id)
                .await?
                .map(|f| f.content)
                .ok_or_else(|| Error::NotFound(file.id.clone())),
            FileOrigin::Engine => self.engine.read_file(&file.name).await,
        }
    }

    /// Delete a file from the backend that produced it.
    pub async fn remove(&self, file: &VirtualFile) -> Result<()> {
        match file.origin {
            FileOrigin::Store => self.store.delete(&file.id).await,
            FileOrigin::Engine => self.engine.delete_file(&file.name).await,
        }
    }

    /// Write a file's content to a local path.
    pub async fn download(&self, file: &VirtualFile, dest: &Path) -> Result<()> {
        let content = self.read(file).await?;
        tokio::fs::write(dest, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_url_schemes() {
        let store_file = VirtualFile {
            id: "abc123".into(),
            name: "notes.md".into(),
            mime_type: "text/markdown".into(),
            size_bytes: 10,
            origin: FileOrigin::Store,
        };
        let engine_file = VirtualFile {
            id: "report.csv".into(),
            name: "report.csv".into(),
            mime_type: "text/csv".into(),
            size_bytes: 20,
            origin: FileOrigin::Engine,
        };

        assert_eq!(store_file.access_url(), "satchel://files/abc123");
        assert_eq!(engine_file.access_url(), "engine://files/report.csv");
    }
}
