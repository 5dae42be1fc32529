//! Library-level ingestion pipeline tests.
//!
//! Run the full pipeline against temp directories with deterministic and
//! scripted embedding providers, over both store backends.

mod common;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use proposal_index::config::Config;
use proposal_index::embedding::{EmbeddingProvider, HashEmbedder};
use proposal_index::error::{IngestError, SkipReason};
use proposal_index::ingest::IngestionPipeline;
use proposal_index::models::{IngestionReport, PipelineState};
use proposal_index::store::{InMemoryStore, SqliteStore, VectorStore};
use tokio_util::sync::CancellationToken;

use common::*;

const COLLECTION: &str = "proposal-documents";

async fn run(
    config: &Config,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
) -> Result<IngestionReport, IngestError> {
    IngestionPipeline::new(config, provider, store)?
        .ingest(&config.paths.source_dir, COLLECTION, CancellationToken::new())
        .await
}

fn hash_provider() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashEmbedder::new(DIMS))
}

async fn snapshot(store: &dyn VectorStore) -> BTreeMap<String, String> {
    let mut all = BTreeMap::new();
    for (source, _) in store.sources(COLLECTION).await.unwrap() {
        all.extend(store.source_hashes(COLLECTION, &source).await.unwrap());
    }
    all
}

fn write(dir: &Path, name: &str, contents: impl AsRef<[u8]>) {
    std::fs::write(dir.join(name), contents).unwrap();
}

#[tokio::test]
async fn supported_and_unsupported_file() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let src = &config.paths.source_dir;
    write(src, "scope.txt", prose("scope", 40));
    write(src, "installer.exe", b"MZ\x90\x00");

    let store = Arc::new(InMemoryStore::new());
    let report = run(&config, hash_provider(), store.clone()).await.unwrap();

    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("installer.exe"));
    assert_eq!(
        report.skipped[0].reason,
        SkipReason::UnsupportedFormat {
            extension: "exe".into()
        }
    );
    assert!(report.passages_indexed > 0);
    assert_eq!(store.count(COLLECTION).await.unwrap(), report.passages_indexed);
    assert_eq!(report.state, PipelineState::Persisted);
}

#[tokio::test]
async fn reingesting_unchanged_directory_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let src = &config.paths.source_dir;
    write(src, "a.txt", prose("alpha", 60));
    write(src, "b.md", prose("beta", 30));
    write(src, "deck.pptx", pptx(&["Kickoff agenda", "Budget overview"]));

    let store = Arc::new(SqliteStore::open(&config.index_db_path()).await.unwrap());

    let first = run(&config, hash_provider(), store.clone()).await.unwrap();
    let before = snapshot(store.as_ref()).await;

    let second = run(&config, hash_provider(), store.clone()).await.unwrap();
    let after = snapshot(store.as_ref()).await;

    assert_eq!(first.loaded, 3);
    assert_eq!(before, after);
    assert_eq!(first.passages_indexed, second.passages_indexed);
    assert_eq!(second.passages_embedded, 0);
    assert_eq!(second.passages_unchanged, first.passages_indexed);
    assert_eq!(second.pruned, 0);
}

#[tokio::test]
async fn changed_file_replaces_only_its_passages() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let src = &config.paths.source_dir;
    write(src, "stable.txt", prose("stable", 50));
    write(src, "draft.txt", prose("draft", 80));

    let store = Arc::new(InMemoryStore::new());
    run(&config, hash_provider(), store.clone()).await.unwrap();
    let before = snapshot(store.as_ref()).await;

    write(src, "draft.txt", prose("revised", 20));
    let report = run(&config, hash_provider(), store.clone()).await.unwrap();
    let after = snapshot(store.as_ref()).await;

    let is_draft = |id: &String| id.contains("draft.txt#");
    let stable_before: HashMap<_, _> = before.iter().filter(|(id, _)| !is_draft(id)).collect();
    let stable_after: HashMap<_, _> = after.iter().filter(|(id, _)| !is_draft(id)).collect();
    assert_eq!(stable_before, stable_after);

    let draft_before = before.keys().filter(|id| is_draft(id)).count();
    let draft_after = after.keys().filter(|id| is_draft(id)).count();
    assert!(draft_after < draft_before);
    assert_eq!(report.pruned, draft_before - draft_after);

    let revised = store
        .query(COLLECTION, &HashEmbedder::new(DIMS).embed_one("revised3"), 50)
        .await
        .unwrap();
    assert!(revised
        .iter()
        .filter(|h| h.passage.source.ends_with("draft.txt"))
        .all(|h| h.passage.text.contains("revised")));
}

#[tokio::test]
async fn hash_in_file_name_does_not_touch_sibling_passages() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let src = &config.paths.source_dir;
    write(src, "plan.txt", prose("plan", 60));
    write(src, "plan.txt#1.txt", prose("annex", 60));

    let store = Arc::new(SqliteStore::open(&config.index_db_path()).await.unwrap());

    let first = run(&config, hash_provider(), store.clone()).await.unwrap();
    assert_eq!(first.loaded, 2);
    assert_eq!(first.pruned, 0);
    assert_eq!(store.count(COLLECTION).await.unwrap(), first.passages_indexed);
    assert_eq!(store.sources(COLLECTION).await.unwrap().len(), 2);

    let second = run(&config, hash_provider(), store.clone()).await.unwrap();
    assert_eq!(second.passages_embedded, 0);
    assert_eq!(second.pruned, 0);
    assert_eq!(store.count(COLLECTION).await.unwrap(), first.passages_indexed);
}

#[tokio::test]
async fn transient_failure_once_still_embeds_every_passage() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.embedding.batch_size = 1000;
    write(&config.paths.source_dir, "a.txt", prose("retry", 40));

    let provider = Arc::new(FlakyOnce::new());
    let store = Arc::new(InMemoryStore::new());
    let report = run(&config, provider.clone(), store.clone()).await.unwrap();

    assert_eq!(provider.calls(), 2);
    let batches = provider.batches.lock().unwrap().clone();
    assert_eq!(batches[0], batches[1]);

    assert!(report.failed_passages.is_empty());
    assert_eq!(report.passages_embedded, batches[0].len());
    assert_eq!(store.count(COLLECTION).await.unwrap(), batches[0].len());
}

#[tokio::test]
async fn persistently_failing_passage_is_reported_and_excluded() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.chunking.chunk_size = 1000;
    config.chunking.chunk_overlap = 0;
    let src = &config.paths.source_dir;
    write(src, "good.txt", "delivery plan for phase one");
    write(src, "bad.txt", "this passage contains POISON text");

    let store = Arc::new(InMemoryStore::new());
    let report = run(&config, Arc::new(Poisoned::new("POISON")), store.clone())
        .await
        .unwrap();

    assert_eq!(report.loaded, 2);
    assert_eq!(report.failed_passages.len(), 1);
    assert!(report.failed_passages[0].source.ends_with("bad.txt"));
    assert_eq!(report.passages_embedded, 1);
    assert_eq!(store.count(COLLECTION).await.unwrap(), 1);
}

#[tokio::test]
async fn fatal_embedding_error_aborts_run() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    write(&config.paths.source_dir, "a.txt", prose("fatal", 30));

    let err = run(&config, Arc::new(Unauthorized), Arc::new(InMemoryStore::new()))
        .await
        .unwrap_err();
    match err {
        IngestError::EmbeddingFatal { stage, cause } => {
            assert_eq!(stage, "embedding");
            assert!(cause.contains("401"));
        }
        other => panic!("expected EmbeddingFatal, got {:?}", other),
    }
}

#[tokio::test]
async fn dimension_mismatch_is_fatal_before_loading() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    write(&config.paths.source_dir, "a.txt", prose("dims", 30));

    let store = Arc::new(InMemoryStore::new());
    store.open_collection(COLLECTION, DIMS * 2, "other").await.unwrap();

    let err = run(&config, hash_provider(), store.clone()).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::IndexDimensionMismatch { expected, actual, .. }
            if expected == DIMS * 2 && actual == DIMS
    ));
    assert_eq!(store.count(COLLECTION).await.unwrap(), 0);
}

#[tokio::test]
async fn nothing_loaded_is_an_error_and_creates_no_collection() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    write(&config.paths.source_dir, "legacy.xls", b"\xd0\xcf\x11\xe0");
    write(&config.paths.source_dir, "broken.docx", b"not a zip");

    let store = Arc::new(InMemoryStore::new());
    let err = run(&config, hash_provider(), store.clone()).await.unwrap_err();
    match err {
        IngestError::NoDocumentsLoaded { scanned, skipped } => {
            assert_eq!(scanned, 2);
            assert_eq!(skipped.len(), 2);
        }
        other => panic!("expected NoDocumentsLoaded, got {:?}", other),
    }
    assert!(store.collection(COLLECTION).await.unwrap().is_none());
}

#[tokio::test]
async fn empty_directory_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let err = run(&config, hash_provider(), Arc::new(InMemoryStore::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NoDocumentsLoaded { scanned: 0, .. }));
}

#[tokio::test]
async fn missing_source_directory_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let err = IngestionPipeline::new(&config, hash_provider(), Arc::new(InMemoryStore::new()))
        .unwrap()
        .ingest(&tmp.path().join("missing"), COLLECTION, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::SourceUnavailable { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_file_is_loaded() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let src = &config.paths.source_dir;
    write(src, "a.txt", prose("local", 30));
    let elsewhere = tmp.path().join("shared-drive");
    std::fs::create_dir_all(&elsewhere).unwrap();
    write(&elsewhere, "terms.txt", prose("terms", 30));
    std::os::unix::fs::symlink(elsewhere.join("terms.txt"), src.join("link.txt")).unwrap();

    let store = Arc::new(InMemoryStore::new());
    let report = run(&config, hash_provider(), store.clone()).await.unwrap();
    assert_eq!(report.loaded, 2);
    assert!(report.skipped.is_empty());
    assert!(store
        .sources(COLLECTION)
        .await
        .unwrap()
        .iter()
        .any(|(source, _)| source.ends_with("link.txt")));
}

#[tokio::test]
async fn corrupt_file_is_skipped_with_cause() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let src = &config.paths.source_dir;
    write(src, "ok.docx", docx("Statement of work for the harbour project"));
    write(src, "corrupt.pptx", b"PK but not really");

    let report = run(&config, hash_provider(), Arc::new(InMemoryStore::new()))
        .await
        .unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("corrupt.pptx"));
    assert!(matches!(
        report.skipped[0].reason,
        SkipReason::LoadFailure { .. }
    ));
}

#[tokio::test]
async fn office_formats_keep_unit_indices() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let src = &config.paths.source_dir;
    write(src, "deck.pptx", pptx(&["Intro slide", "Timeline slide", "Pricing slide"]));
    write(src, "costs.xlsx", xlsx("Total", "1250"));

    let store = Arc::new(InMemoryStore::new());
    let report = run(&config, hash_provider(), store.clone()).await.unwrap();
    assert_eq!(report.loaded, 2);

    let ids = snapshot(store.as_ref()).await;
    let deck: Vec<&String> = ids.keys().filter(|id| id.contains("deck.pptx#")).collect();
    assert_eq!(deck.len(), 3);
    assert!(deck.iter().any(|id| id.ends_with("#2:0")));
    assert!(ids.keys().any(|id| id.contains("costs.xlsx#0:0")));
}

#[tokio::test]
async fn cancellation_keeps_flushed_batches_and_skips_pruning() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.embedding.batch_size = 2;
    config.pipeline.max_concurrency = 1;
    for i in 0..5 {
        write(&config.paths.source_dir, &format!("f{}.txt", i), prose("cancel", 40));
    }

    let cancel = CancellationToken::new();
    let store = Arc::new(InMemoryStore::new());
    let report = IngestionPipeline::new(
        &config,
        Arc::new(CancelOnFirstCall::new(cancel.clone())),
        store.clone(),
    )
    .unwrap()
    .ingest(&config.paths.source_dir, COLLECTION, cancel)
    .await
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.passages_embedded, 2);
    assert!(report.pending_on_cancel > 0);
    assert_eq!(report.pruned, 0);
    assert_ne!(report.state, PipelineState::Persisted);
    assert_eq!(store.count(COLLECTION).await.unwrap(), 2);
    assert_eq!(store.persist_count(), 1);
}

#[tokio::test]
async fn distinct_collections_ingest_concurrently() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    write(&config.paths.source_dir, "a.txt", prose("shared", 50));

    let store: Arc<dyn VectorStore> =
        Arc::new(SqliteStore::open(&config.index_db_path()).await.unwrap());
    let pipeline = IngestionPipeline::new(&config, hash_provider(), store.clone()).unwrap();

    let (one, two) = tokio::join!(
        pipeline.ingest(&config.paths.source_dir, "one", CancellationToken::new()),
        pipeline.ingest(&config.paths.source_dir, "two", CancellationToken::new()),
    );
    let (one, two) = (one.unwrap(), two.unwrap());
    assert_eq!(one.passages_indexed, two.passages_indexed);
    assert_eq!(store.count("one").await.unwrap(), one.passages_indexed);
    assert_eq!(store.count("two").await.unwrap(), two.passages_indexed);
}

#[test]
fn overlap_not_smaller_than_size_fails_before_touching_filesystem() {
    let mut config = Config::with_base_dir(Path::new("/nonexistent/base"));
    config.chunking.chunk_size = 10;
    config.chunking.chunk_overlap = 10;
    let err = IngestionPipeline::new(&config, hash_provider(), Arc::new(InMemoryStore::new()))
        .err()
        .unwrap();
    assert!(matches!(err, IngestError::ChunkConfig(_)));
    assert!(!Path::new("/nonexistent/base").exists());
}
