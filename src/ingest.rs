//! Ingestion pipeline orchestration.
//!
//! Coordinates one run: scan → load → chunk → embed → upsert → persist.
//!
//! ```text
//!  scan ──▶ dispatcher ──(Semaphore: max_concurrency)──▶ spawn_blocking(load + chunk)
//!                                                            │
//!                                  bounded mpsc ◀────────────┘
//!                                       │
//!                fan-in: drop unchanged passages, buffer the rest,
//!                flush at batch_size or every flush_interval_ms
//!                                       │
//!                      embed_resilient ──▶ VectorStore::upsert
//! ```
//!
//! Per-file failures become [`SkippedFile`]s and per-passage embedding
//! failures become [`FailedPassage`]s; both are listed in the report.
//! Configuration, fatal embedding and store errors abort the run.
//!
//! Re-running on unchanged files embeds nothing: passages whose id and
//! content hash are already stored are counted as unchanged. When a file
//! changes, its passages are upserted by id and any of its ids not produced
//! this run are pruned, so exactly that file's entries are replaced.
//!
//! Zero successfully loaded files is [`IngestError::NoDocumentsLoaded`];
//! the collection is not created in that case.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use globset::GlobSet;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{create_provider, embed_resilient, EmbeddingProvider, RetryPolicy};
use crate::error::{FailedPassage, IngestError, SkipReason, SkippedFile};
use crate::loader::{LoaderKind, LoaderRegistry};
use crate::models::{EmbeddedPassage, IngestionReport, Passage, PipelineState, SourceDocument};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};
use crate::scan::{build_globset, scan_source_dir};
use crate::store::{SqliteStore, VectorStore};

pub struct IngestionPipeline {
    chunker: Chunker,
    registry: Arc<LoaderRegistry>,
    exclude: GlobSet,
    recursive: bool,
    max_concurrency: usize,
    max_file_bytes: u64,
    batch_size: usize,
    flush_interval: Duration,
    retry: RetryPolicy,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    progress: Arc<dyn IngestProgressReporter>,
}

/// Result of loading and chunking one file on a worker.
struct FileOutcome {
    doc: SourceDocument,
    result: Result<Vec<Passage>, String>,
}

/// Mutable state of a single run.
struct Run<'a> {
    collection: &'a str,
    report: IngestionReport,
    opened: bool,
    pending: Vec<Passage>,
    produced: usize,
    /// Ids produced this run, per loaded source.
    keep: HashMap<String, HashSet<String>>,
}

impl<'a> Run<'a> {
    fn new(collection: &'a str) -> Self {
        Self {
            collection,
            report: IngestionReport::new(collection),
            opened: false,
            pending: Vec::new(),
            produced: 0,
            keep: HashMap::new(),
        }
    }
}

impl IngestionPipeline {
    /// Fails with [`IngestError::ChunkConfig`] before touching the
    /// filesystem if the chunk settings are invalid.
    pub fn new(
        config: &Config,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, IngestError> {
        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;

        let exclude = build_globset(&config.pipeline.exclude_globs)
            .map_err(|e| IngestError::Config(format!("pipeline.exclude_globs: {:#}", e)))?;
        if config.pipeline.max_concurrency == 0 {
            return Err(IngestError::Config(
                "pipeline.max_concurrency must be > 0".to_string(),
            ));
        }
        if config.embedding.batch_size == 0 {
            return Err(IngestError::Config(
                "embedding.batch_size must be > 0".to_string(),
            ));
        }

        Ok(Self {
            chunker,
            registry: Arc::new(LoaderRegistry::new(config.loaders.clone())),
            exclude,
            recursive: config.pipeline.recursive,
            max_concurrency: config.pipeline.max_concurrency,
            max_file_bytes: config.pipeline.max_file_bytes,
            batch_size: config.embedding.batch_size,
            flush_interval: Duration::from_millis(config.embedding.flush_interval_ms.max(1)),
            retry: RetryPolicy::from_config(&config.embedding),
            provider,
            store,
            progress: Arc::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, reporter: Box<dyn IngestProgressReporter>) -> Self {
        self.progress = Arc::from(reporter);
        self
    }

    /// Ingest every file in `source_dir` into `collection`.
    ///
    /// Cancelling `cancel` stops scheduling file and batch work; batches
    /// already upserted are persisted and the partial report is returned
    /// with `cancelled = true`.
    pub async fn ingest(
        &self,
        source_dir: &Path,
        collection: &str,
        cancel: CancellationToken,
    ) -> Result<IngestionReport, IngestError> {
        let started = Instant::now();
        let mut run = Run::new(collection);

        tracing::info!(
            source_dir = %source_dir.display(),
            collection,
            "ingestion started"
        );
        self.progress.report(IngestProgressEvent::Scanning {
            dir: source_dir.display().to_string(),
        });

        // Fail on a dimension mismatch before loading anything.
        if let Some(existing) = self
            .store
            .collection(collection)
            .await
            .map_err(|e| IngestError::from_store("open", e))?
        {
            if existing.dims != self.provider.dims() {
                return Err(IngestError::IndexDimensionMismatch {
                    collection: collection.to_string(),
                    expected: existing.dims,
                    actual: self.provider.dims(),
                });
            }
        }

        let scan = scan_source_dir(source_dir, &self.exclude, self.recursive)?;
        let scanned = scan.scanned();
        run.report.skipped.extend(scan.skipped);

        let mut supported = Vec::new();
        for doc in scan.documents {
            match self.registry.resolve(&doc.extension) {
                Some(kind) => supported.push((doc, kind)),
                None => {
                    tracing::info!(path = %doc.path.display(), "skipping unsupported format");
                    run.report.skipped.push(SkippedFile {
                        reason: SkipReason::UnsupportedFormat {
                            extension: doc.extension.clone(),
                        },
                        path: doc.path,
                    });
                }
            }
        }
        tracing::info!(
            scanned,
            supported = supported.len(),
            skipped = run.report.skipped.len(),
            "scan complete"
        );

        let total = supported.len() as u64;
        self.advance(&mut run, PipelineState::Loading);
        let rx = self.dispatch(supported, cancel.clone());
        self.fan_in(&mut run, rx, &cancel, total).await?;

        if !run.report.cancelled {
            let rest = std::mem::take(&mut run.pending);
            for batch in rest.chunks(self.batch_size) {
                if cancel.is_cancelled() {
                    run.report.cancelled = true;
                    run.pending.extend_from_slice(batch);
                    continue;
                }
                self.flush(&mut run, batch.to_vec()).await?;
            }
        }
        run.report.pending_on_cancel = run.pending.len();

        if run.report.loaded == 0 && !run.report.cancelled {
            tracing::warn!(scanned, "no documents loaded; index left untouched");
            return Err(IngestError::NoDocumentsLoaded {
                scanned,
                skipped: run.report.skipped,
            });
        }

        if !run.report.cancelled {
            self.prune(&mut run).await?;
        }

        if run.opened {
            self.store
                .persist(collection)
                .await
                .map_err(|e| IngestError::from_store("persist", e))?;
            if !run.report.cancelled {
                self.advance(&mut run, PipelineState::Persisted);
            }
        }

        let report = &mut run.report;
        report.passages_indexed = report.passages_unchanged + report.passages_embedded;
        report.duration = started.elapsed();

        if run.opened {
            self.progress.report(IngestProgressEvent::Persisted {
                collection: collection.to_string(),
                passages: report.passages_indexed as u64,
            });
        }
        tracing::info!(
            collection,
            loaded = report.loaded,
            skipped = report.skipped.len(),
            passages_indexed = report.passages_indexed,
            passages_embedded = report.passages_embedded,
            failed_passages = report.failed_passages.len(),
            pruned = report.pruned,
            cancelled = report.cancelled,
            duration_ms = report.duration.as_millis() as u64,
            "ingestion finished"
        );

        Ok(run.report)
    }

    /// Spawn load + chunk work for every supported file, at most
    /// `max_concurrency` at a time. Outcomes arrive on the returned channel,
    /// which closes once every scheduled file has reported.
    fn dispatch(
        &self,
        files: Vec<(SourceDocument, LoaderKind)>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<FileOutcome> {
        let (tx, rx) = mpsc::channel(self.max_concurrency * 2);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let chunker = self.chunker;
        let max_bytes = self.max_file_bytes;

        tokio::spawn(async move {
            for (doc, kind) in files {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let path = doc.path.clone();
                    let source = doc.source_key();
                    let result = tokio::task::spawn_blocking(move || {
                        kind.load(&path, &source, max_bytes)
                            .map(|units| chunker.split(&units))
                            .map_err(|e| e.to_string())
                    })
                    .await
                    .unwrap_or_else(|e| Err(format!("loader task failed: {}", e)));
                    drop(permit);
                    let _ = tx.send(FileOutcome { doc, result }).await;
                });
            }
        });

        rx
    }

    /// Drain file outcomes into cross-file batches until the channel closes
    /// or `cancel` fires. A batch is flushed once `batch_size` passages are
    /// pending, or when `flush_interval` elapses with any pending.
    async fn fan_in(
        &self,
        run: &mut Run<'_>,
        mut rx: mpsc::Receiver<FileOutcome>,
        cancel: &CancellationToken,
        total: u64,
    ) -> Result<(), IngestError> {
        let mut done = 0u64;
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    run.report.cancelled = true;
                    break;
                }
                msg = rx.recv() => {
                    let Some(outcome) = msg else { break };
                    done += 1;
                    self.accept(run, outcome).await?;
                    self.progress.report(IngestProgressEvent::Loading { done, total });
                    while run.pending.len() >= self.batch_size {
                        let batch: Vec<Passage> = run.pending.drain(..self.batch_size).collect();
                        self.flush(run, batch).await?;
                        if cancel.is_cancelled() {
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !run.pending.is_empty() {
                        tracing::debug!(pending = run.pending.len(), "flush interval elapsed");
                        let batch = std::mem::take(&mut run.pending);
                        self.flush(run, batch).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Record a file outcome and queue its new or changed passages.
    async fn accept(&self, run: &mut Run<'_>, outcome: FileOutcome) -> Result<(), IngestError> {
        let passages = match outcome.result {
            Ok(passages) => passages,
            Err(cause) => {
                tracing::warn!(path = %outcome.doc.path.display(), %cause, "failed to load file");
                run.report.skipped.push(SkippedFile {
                    path: outcome.doc.path,
                    reason: SkipReason::LoadFailure { cause },
                });
                return Ok(());
            }
        };

        run.report.loaded += 1;
        self.advance(run, PipelineState::Chunking);
        self.ensure_collection(run).await?;

        let source = outcome.doc.source_key();
        let existing = self
            .store
            .source_hashes(run.collection, &source)
            .await
            .map_err(|e| IngestError::from_store("lookup", e))?;

        let ids = run.keep.entry(source).or_default();
        let mut queued = 0usize;
        for p in passages {
            ids.insert(p.id.clone());
            if existing.get(&p.id) == Some(&p.hash) {
                run.report.passages_unchanged += 1;
            } else {
                run.pending.push(p);
                queued += 1;
            }
        }
        run.produced += queued;

        tracing::debug!(
            path = %outcome.doc.path.display(),
            passages = ids.len(),
            queued,
            "file chunked"
        );
        Ok(())
    }

    async fn ensure_collection(&self, run: &mut Run<'_>) -> Result<(), IngestError> {
        if run.opened {
            return Ok(());
        }
        let info = self
            .store
            .open_collection(run.collection, self.provider.dims(), self.provider.model_name())
            .await
            .map_err(|e| IngestError::from_store("open", e))?;
        tracing::info!(collection = %info.name, dims = info.dims, model = %info.model, "collection opened");
        run.opened = true;
        Ok(())
    }

    /// Embed and upsert one batch. Passages that cannot be embedded are
    /// reported and left out.
    async fn flush(&self, run: &mut Run<'_>, batch: Vec<Passage>) -> Result<(), IngestError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.advance(run, PipelineState::Embedding);

        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let results = embed_resilient(self.provider.as_ref(), &texts, self.retry)
            .await
            .map_err(|e| IngestError::EmbeddingFatal {
                stage: "embedding",
                cause: e.to_string(),
            })?;

        let mut embedded = Vec::with_capacity(batch.len());
        for (passage, result) in batch.into_iter().zip(results) {
            match result {
                Ok(vector) => embedded.push(EmbeddedPassage { passage, vector }),
                Err(e) => {
                    tracing::warn!(id = %passage.id, error = %e, "passage excluded from index");
                    if let Some(ids) = run.keep.get_mut(&passage.source) {
                        ids.remove(&passage.id);
                    }
                    run.report.failed_passages.push(FailedPassage {
                        id: passage.id,
                        source: passage.source,
                        cause: e.to_string(),
                    });
                }
            }
        }

        if !embedded.is_empty() {
            self.advance(run, PipelineState::Upserting);
            self.store
                .upsert(run.collection, &embedded)
                .await
                .map_err(|e| IngestError::from_store("upsert", e))?;
            run.report.passages_embedded += embedded.len();
        }

        tracing::debug!(
            upserted = embedded.len(),
            total_embedded = run.report.passages_embedded,
            "batch flushed"
        );
        self.progress.report(IngestProgressEvent::Embedding {
            embedded: run.report.passages_embedded as u64,
            produced: run.produced as u64,
        });
        Ok(())
    }

    /// Remove ids of loaded sources that this run did not produce.
    async fn prune(&self, run: &mut Run<'_>) -> Result<(), IngestError> {
        for (source, keep) in &run.keep {
            let removed = self
                .store
                .prune_source(run.collection, source, keep)
                .await
                .map_err(|e| IngestError::from_store("prune", e))?;
            if removed > 0 {
                tracing::info!(source = %source, removed, "pruned stale passages");
            }
            run.report.pruned += removed;
        }
        Ok(())
    }

    fn advance(&self, run: &mut Run<'_>, state: PipelineState) {
        if state > run.report.state {
            tracing::info!(from = %run.report.state, to = %state, "pipeline state");
            run.report.state = state;
        }
    }
}

/// Run the ingest command: build the pipeline from `config`, ingest, and
/// print the report. Ctrl-C cancels the run gracefully.
pub async fn run_ingest(
    config: &Config,
    source_dir: Option<&Path>,
    collection: Option<&str>,
    json: bool,
    progress: Box<dyn IngestProgressReporter>,
) -> anyhow::Result<()> {
    let source_dir = source_dir.unwrap_or(&config.paths.source_dir);
    let collection = collection.unwrap_or(&config.paths.collection_name);

    let provider = create_provider(&config.embedding)?;
    let db_path = config.index_db_path();
    let store = SqliteStore::open(&db_path)
        .await
        .map_err(|e| IngestError::StoreUnavailable {
            path: db_path.clone(),
            cause: e.to_string(),
        })?;

    let pipeline =
        IngestionPipeline::new(config, provider, Arc::new(store))?.with_progress(progress);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    let report = pipeline.ingest(source_dir, collection, cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &IngestionReport) {
    println!("ingest {}", report.collection);
    println!("  loaded: {} files", report.loaded);
    println!("  skipped: {} files", report.skipped.len());
    for s in &report.skipped {
        println!("    - {} ({})", s.path.display(), s.reason);
    }
    println!("  passages indexed: {}", report.passages_indexed);
    println!("  passages embedded: {}", report.passages_embedded);
    println!("  passages unchanged: {}", report.passages_unchanged);
    if report.pruned > 0 {
        println!("  stale passages pruned: {}", report.pruned);
    }
    if !report.failed_passages.is_empty() {
        println!("  failed passages: {}", report.failed_passages.len());
        for f in &report.failed_passages {
            println!("    - {} ({})", f.id, f.cause);
        }
    }
    println!("  duration: {:.2}s", report.duration.as_secs_f64());
    if report.cancelled {
        println!(
            "cancelled ({} passages not flushed)",
            report.pending_on_cancel
        );
    } else {
        println!("ok");
    }
}
