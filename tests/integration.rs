//! End-to-end tests across the store, pipeline, engine, and bridge.

use std::sync::Arc;

use tempfile::TempDir;

use satchel::bridge::QueryBridge;
use satchel::chunk::{chunk, ChunkPolicy};
use satchel::embedding::{EmbeddingBackend, MockBackend};
use satchel::engine::{missing_relation, QueryEngine, SqliteEngine};
use satchel::error::Error;
use satchel::models::{Chunk, NewFile};
use satchel::pipeline::generate_embeddings;
use satchel::search::similar_chunks;
use satchel::store::{content_id, FileStore};
use satchel::vfs::{FileOrigin, VirtualFs};

async fn setup_store(dir: &TempDir) -> FileStore {
    let pool = satchel::db::connect(&dir.path().join("satchel.db"))
        .await
        .unwrap();
    satchel::migrate::run_migrations(&pool).await.unwrap();
    FileStore::new(pool)
}

fn synthetic_chunks(count: usize) -> Vec<Chunk> {
    (0..count)
        .map(|i| Chunk::new(i as i64, format!("chunk text number {}", i), 0))
        .collect()
}

// ---- content addressing ----

#[tokio::test]
async fn identical_content_collapses_to_one_record() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let first = store
        .find_or_create(NewFile::new("report.pdf", "application/pdf", b"same bytes".to_vec()))
        .await
        .unwrap();
    let second = store
        .find_or_create(NewFile::new("renamed.pdf", "application/pdf", b"same bytes".to_vec()))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.id, content_id(b"same bytes"));
    // The existing record is returned unchanged — no name overwrite.
    assert_eq!(second.name, "report.pdf");
    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_same_content_uploads_create_one_record() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let (a, b) = tokio::join!(
        store.find_or_create(NewFile::new("one.txt", "text/plain", b"same".to_vec())),
        store.find_or_create(NewFile::new("two.txt", "text/plain", b"same".to_vec()))
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(a.id, b.id);
    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn find_by_content_hashes_then_looks_up() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    store
        .find_or_create(NewFile::new("a.txt", "text/plain", b"payload".to_vec()))
        .await
        .unwrap();

    let hit = store.find_by_content(b"payload").await.unwrap();
    assert!(hit.is_some());
    assert!(store.find_by_content(b"other").await.unwrap().is_none());
}

#[tokio::test]
async fn validation_failures_reject_immediately() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let empty_name = store
        .find_or_create(NewFile::new("", "text/plain", b"x".to_vec()))
        .await;
    assert!(matches!(empty_name, Err(Error::InvalidInput(_))));

    let bad_mime = store
        .find_or_create(NewFile::new("x.bin", "not-a-mime", b"x".to_vec()))
        .await;
    assert!(matches!(bad_mime, Err(Error::InvalidInput(_))));

    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn enrichment_is_field_level() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let file = store
        .find_or_create(NewFile::new("doc.txt", "text/plain", b"doc body".to_vec()))
        .await
        .unwrap();

    store.set_text(&file.id, "extracted text").await.unwrap();
    store
        .set_metadata(&file.id, "author", serde_json::json!("ada"))
        .await
        .unwrap();
    store
        .set_metadata(&file.id, "pages", serde_json::json!(3))
        .await
        .unwrap();
    store.rename(&file.id, "doc-v2.txt").await.unwrap();
    store
        .set_chunks(&file.id, &synthetic_chunks(2))
        .await
        .unwrap();

    let loaded = store.find_by_id(&file.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "doc-v2.txt");
    assert_eq!(loaded.text.as_deref(), Some("extracted text"));
    assert_eq!(loaded.metadata["author"], "ada");
    assert_eq!(loaded.metadata["pages"], 3);
    assert_eq!(loaded.chunks.len(), 2);
    // Content and identity never move.
    assert_eq!(loaded.content, b"doc body");
    assert_eq!(loaded.id, file.id);
}

#[tokio::test]
async fn delete_removes_file_and_chunks() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let file = store
        .find_or_create(NewFile::new("gone.txt", "text/plain", b"bye".to_vec()))
        .await
        .unwrap();
    store
        .set_chunks(&file.id, &synthetic_chunks(3))
        .await
        .unwrap();

    store.delete(&file.id).await.unwrap();
    assert!(store.find_by_id(&file.id).await.unwrap().is_none());
    assert!(matches!(
        store.delete(&file.id).await,
        Err(Error::NotFound(_))
    ));
}

// ---- embedding pipeline ----

#[tokio::test]
async fn batch_integrity_one_call_per_window() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let file = store
        .find_or_create(NewFile::new("big.txt", "text/plain", b"ten chunks".to_vec()))
        .await
        .unwrap();
    store
        .set_chunks(&file.id, &synthetic_chunks(10))
        .await
        .unwrap();

    let backend = MockBackend::new().with_default_batch_size(4);
    generate_embeddings(&store, &file.id, &backend, None)
        .await
        .unwrap();

    // ceil(10 / 4) backend calls
    assert_eq!(backend.call_count(), 3);

    let loaded = store.find_by_id(&file.id).await.unwrap().unwrap();
    assert!(loaded.is_embedded());
    for c in &loaded.chunks {
        assert_eq!(c.embedding.len(), backend.info().dimensions);
    }
    let stamp = &loaded.metadata["embedding"];
    assert_eq!(stamp["backend"], "mock");
    assert_eq!(stamp["dimensions"], 8);
    assert!(stamp["completed_at"].is_string());
}

#[tokio::test]
async fn batch_override_is_clamped_to_backend_limits() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let file = store
        .find_or_create(NewFile::new("clamp.txt", "text/plain", b"clamp".to_vec()))
        .await
        .unwrap();
    store
        .set_chunks(&file.id, &synthetic_chunks(20))
        .await
        .unwrap();

    // max_batch_size is 16; an oversized override clamps down to it.
    let backend = MockBackend::new();
    generate_embeddings(&store, &file.id, &backend, Some(500))
        .await
        .unwrap();
    assert_eq!(backend.call_count(), 2); // ceil(20 / 16)
}

#[tokio::test]
async fn embedding_requires_chunks() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let file = store
        .find_or_create(NewFile::new("empty.txt", "text/plain", b"no chunks".to_vec()))
        .await
        .unwrap();

    let backend = MockBackend::new();
    let result = generate_embeddings(&store, &file.id, &backend, None).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn partial_failure_keeps_prior_batches_durable() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let file = store
        .find_or_create(NewFile::new("partial.txt", "text/plain", b"partial".to_vec()))
        .await
        .unwrap();
    store
        .set_chunks(&file.id, &synthetic_chunks(10))
        .await
        .unwrap();

    let backend = MockBackend::new()
        .with_default_batch_size(4)
        .with_failure_at_call(2);
    let result = generate_embeddings(&store, &file.id, &backend, None).await;
    assert!(matches!(result, Err(Error::Backend(_))));

    let loaded = store.find_by_id(&file.id).await.unwrap().unwrap();
    // Batch 1 (chunks 0..4) survived the failed run.
    for c in &loaded.chunks[..4] {
        assert!(!c.embedding.is_empty());
    }
    for c in &loaded.chunks[4..] {
        assert!(c.embedding.is_empty());
    }
    // No completion stamp after an aborted run.
    assert!(loaded.metadata.get("embedding").is_none());
}

#[tokio::test]
async fn rerun_after_failure_skips_embedded_chunks() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let file = store
        .find_or_create(NewFile::new("resume.txt", "text/plain", b"resume".to_vec()))
        .await
        .unwrap();
    store
        .set_chunks(&file.id, &synthetic_chunks(10))
        .await
        .unwrap();

    let failing = MockBackend::new()
        .with_default_batch_size(4)
        .with_failure_at_call(2);
    assert!(generate_embeddings(&store, &file.id, &failing, None)
        .await
        .is_err());

    // Re-run with a healthy backend: only the 6 unembedded chunks remain,
    // so ceil(6 / 4) = 2 calls.
    let healthy = MockBackend::new().with_default_batch_size(4);
    generate_embeddings(&store, &file.id, &healthy, None)
        .await
        .unwrap();
    assert_eq!(healthy.call_count(), 2);

    let loaded = store.find_by_id(&file.id).await.unwrap().unwrap();
    assert!(loaded.is_embedded());
}

// ---- chunk + embed + search flow ----

#[tokio::test]
async fn small_files_embed_as_one_unit() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let small = "A short note, well under the chunking minimum.";
    let file = store
        .find_or_create(
            NewFile::new("note.txt", "text/plain", small.as_bytes().to_vec()).with_text(small),
        )
        .await
        .unwrap();

    let written = satchel::pipeline::chunk_file(&store, &file.id, &ChunkPolicy::default())
        .await
        .unwrap();
    assert_eq!(written, 1);

    let loaded = store.find_by_id(&file.id).await.unwrap().unwrap();
    assert_eq!(loaded.chunks.len(), 1);
    assert_eq!(loaded.chunks[0].text, small);
    assert_eq!(loaded.chunks[0].overlap_chars, 0);
}

#[tokio::test]
async fn chunk_file_requires_extracted_text() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let file = store
        .find_or_create(NewFile::new("image.png", "image/png", vec![0u8; 16]))
        .await
        .unwrap();

    let result = satchel::pipeline::chunk_file(&store, &file.id, &ChunkPolicy::default()).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn chunk_embed_search_flow() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir).await;

    let text = (0..30)
        .map(|i| format!("Paragraph {} talks about topic {}.", i, i % 5))
        .collect::<Vec<_>>()
        .join("\n\n");
    let file = store
        .find_or_create(
            NewFile::new("corpus.md", "text/markdown", text.clone().into_bytes())
                .with_text(text.clone()),
        )
        .await
        .unwrap();

    let policy = ChunkPolicy {
        max_chars: 120,
        overlap_percentage: 10,
        preserve_separators: false,
    };
    let chunks = chunk(&text, &policy);
    assert!(chunks.len() > 1);
    store.set_chunks(&file.id, &chunks).await.unwrap();

    let backend = MockBackend::new().with_dimensions(32);
    generate_embeddings(&store, &file.id, &backend, None)
        .await
        .unwrap();

    // Querying with a chunk's own vector must rank that chunk first.
    let loaded = store.find_by_id(&file.id).await.unwrap().unwrap();
    let target = &loaded.chunks[2];
    let query = backend.embed(&target.text).await.unwrap();
    let matches = similar_chunks(&store, &query, 5).await.unwrap();
    assert_eq!(matches[0].chunk_index, target.index);
    assert!((matches[0].score - 1.0).abs() < 1e-5);
}

// ---- virtual filesystem ----

#[tokio::test]
async fn listing_prefers_store_on_name_collision() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(setup_store(&dir).await);
    let engine: Arc<dyn QueryEngine> = Arc::new(SqliteEngine::in_memory());

    engine
        .put_file("report.csv", "text/csv", b"engine copy")
        .await
        .unwrap();
    engine
        .put_file("engine-only.bin", "application/octet-stream", b"blob")
        .await
        .unwrap();
    let stored = store
        .find_or_create(NewFile::new("report.csv", "text/csv", b"store copy".to_vec()))
        .await
        .unwrap();

    let vfs = VirtualFs::new(store.clone(), engine.clone());
    let listing = vfs.list("").await.unwrap();

    assert_eq!(listing.len(), 2);
    let report = listing.iter().find(|f| f.name == "report.csv").unwrap();
    assert_eq!(report.origin, FileOrigin::Store);
    assert_eq!(report.id, stored.id);
    let other = listing.iter().find(|f| f.name == "engine-only.bin").unwrap();
    assert_eq!(other.origin, FileOrigin::Engine);

    // Reads delegate to the producing backend.
    assert_eq!(vfs.read(report).await.unwrap(), b"store copy");
    assert_eq!(vfs.read(other).await.unwrap(), b"blob");
}

#[tokio::test]
async fn vfs_get_remove_and_download() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(setup_store(&dir).await);
    let engine: Arc<dyn QueryEngine> = Arc::new(SqliteEngine::in_memory());

    engine
        .put_file("native.txt", "text/plain", b"native content")
        .await
        .unwrap();
    store
        .find_or_create(NewFile::new("mine.txt", "text/plain", b"mine".to_vec()))
        .await
        .unwrap();

    let vfs = VirtualFs::new(store.clone(), engine.clone());

    let missing = vfs.get("nope.txt", "").await;
    assert!(matches!(missing, Err(Error::NotFound(_))));

    let native = vfs.get("native.txt", "").await.unwrap();
    let dest = dir.path().join("downloaded.txt");
    vfs.download(&native, &dest).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"native content");
    assert_eq!(native.access_url(), "engine://files/native.txt");

    vfs.remove(&native).await.unwrap();
    assert!(engine.list_files().await.unwrap().is_empty());

    let mine = vfs.get("mine.txt", "").await.unwrap();
    vfs.remove(&mine).await.unwrap();
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn scoped_listing_filters_store_files() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(setup_store(&dir).await);
    let engine: Arc<dyn QueryEngine> = Arc::new(SqliteEngine::in_memory());

    store
        .find_or_create(
            NewFile::new("chat-a.txt", "text/plain", b"a".to_vec()).with_scope("chat-a"),
        )
        .await
        .unwrap();
    store
        .find_or_create(
            NewFile::new("chat-b.txt", "text/plain", b"b".to_vec()).with_scope("chat-b"),
        )
        .await
        .unwrap();

    let vfs = VirtualFs::new(store.clone(), engine.clone());
    let listing = vfs.list("chat-a").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "chat-a.txt");
}

// ---- query bridge ----

#[tokio::test]
async fn lazy_sync_recovers_missing_files_table() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(setup_store(&dir).await);
    let engine: Arc<dyn QueryEngine> = Arc::new(SqliteEngine::in_memory());

    store
        .find_or_create(NewFile::new("alpha.txt", "text/plain", b"alpha".to_vec()))
        .await
        .unwrap();
    store
        .find_or_create(NewFile::new("beta.txt", "text/plain", b"beta".to_vec()))
        .await
        .unwrap();

    let bridge = QueryBridge::new(store.clone(), engine.clone());

    // First external call: internally fails on the cold engine, syncs,
    // retries once, and succeeds.
    let rows = bridge
        .query("SELECT name, size_bytes FROM files ORDER BY name")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.rows[0][0], serde_json::json!("alpha.txt"));
    assert_eq!(rows.rows[1][0], serde_json::json!("beta.txt"));

    // The engine now holds a snapshot; a later store write is not visible
    // until the next sync (eventual consistency by design).
    store
        .find_or_create(NewFile::new("gamma.txt", "text/plain", b"gamma".to_vec()))
        .await
        .unwrap();
    let cached = bridge.query("SELECT name FROM files").await.unwrap();
    assert_eq!(cached.len(), 2);

    // An explicit sync refreshes the snapshot.
    bridge.sync_table("files").await.unwrap();
    let refreshed = bridge.query("SELECT name FROM files").await.unwrap();
    assert_eq!(refreshed.len(), 3);
}

#[tokio::test]
async fn unknown_tables_and_other_errors_propagate() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(setup_store(&dir).await);
    let engine: Arc<dyn QueryEngine> = Arc::new(SqliteEngine::in_memory());
    let bridge = QueryBridge::new(store.clone(), engine.clone());

    // Missing table that is not on the synchronizable list: no resync.
    let err = bridge.query("SELECT * FROM conversations").await.unwrap_err();
    match err {
        Error::EngineQuery(msg) => {
            assert_eq!(missing_relation(&msg).as_deref(), Some("conversations"));
        }
        other => panic!("expected EngineQuery, got {:?}", other),
    }

    // Plain syntax errors propagate verbatim.
    let err = bridge.query("SELEKT broken").await.unwrap_err();
    assert!(matches!(err, Error::EngineQuery(_)));

    // And explicit syncs of unknown tables are rejected.
    assert!(matches!(
        bridge.sync_table("conversations").await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn lazy_sync_of_empty_store_yields_empty_table() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(setup_store(&dir).await);
    let engine: Arc<dyn QueryEngine> = Arc::new(SqliteEngine::in_memory());
    let bridge = QueryBridge::new(store.clone(), engine.clone());

    let rows = bridge.query("SELECT id FROM files").await.unwrap();
    assert!(rows.is_empty());
}
