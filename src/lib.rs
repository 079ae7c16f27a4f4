//! # Satchel
//!
//! Document preparation core for a retrieval-augmented chat client.
//!
//! Satchel owns the path from "user dropped a file into the chat" to
//! "the assistant can retrieve and query it": a content-addressed file
//! store, a deterministic text chunker, a batched embedding pipeline,
//! and a virtual filesystem that reconciles the document store with an
//! embedded analytical query engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌─────────────┐
//! │  FileStore    │──▶│   Chunker     │──▶│  Pipeline    │
//! │ sha256-keyed  │   │ para/sentence │   │ batch embed  │
//! └──────┬────────┘   └───────────────┘   └─────────────┘
//!        │
//!        ├──────────────────────┐
//!        ▼                      ▼
//! ┌──────────────┐       ┌──────────────┐
//! │  VirtualFs    │◀─────▶│ QueryEngine  │
//! │ merged listing│ bridge│  SQL + files │
//! └──────────────┘       └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use satchel::chunk::{chunk, ChunkPolicy};
//! use satchel::embedding::MockBackend;
//! use satchel::models::NewFile;
//! use satchel::store::FileStore;
//!
//! # async fn example() -> satchel::error::Result<()> {
//! let pool = satchel::db::connect(Path::new("satchel.db")).await?;
//! satchel::migrate::run_migrations(&pool).await?;
//! let store = FileStore::new(pool);
//!
//! let file = store
//!     .find_or_create(NewFile::new("notes.md", "text/markdown", b"...".to_vec()))
//!     .await?;
//! let chunks = chunk("document text", &ChunkPolicy::default());
//! store.set_chunks(&file.id, &chunks).await?;
//!
//! let backend = MockBackend::new();
//! satchel::pipeline::generate_embeddings(&store, &file.id, &backend, None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Content-addressed file store |
//! | [`chunk`] | Deterministic text chunking with overlap |
//! | [`embedding`] | Embedding backend abstraction |
//! | [`pipeline`] | Batched embedding generation |
//! | [`engine`] | Analytical query engine abstraction |
//! | [`vfs`] | Merged virtual file listing |
//! | [`bridge`] | Lazy table sync into the engine |
//! | [`search`] | Cosine lookup over embedded chunks |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod bridge;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod store;
pub mod vfs;
