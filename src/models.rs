//! Core data models that flow through the ingestion pipeline.
//!
//! ```text
//! SourceDocument ──load──▶ RawTextUnit* ──split──▶ Passage* ──embed──▶ EmbeddedPassage* ──upsert──▶ collection
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{FailedPassage, SkippedFile};

/// A file discovered in the source directory.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Absolute path; the document's identity.
    pub path: PathBuf,
    /// Lower-cased extension without the leading dot (empty if none).
    pub extension: String,
    pub size_bytes: u64,
    pub loaded_at: DateTime<Utc>,
}

impl SourceDocument {
    /// Value of `Passage::source` for every passage from this file.
    pub fn source_key(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// Text produced by a loader from one source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTextUnit {
    pub text: String,
    pub source: String,
    /// Page, slide or sheet index; `0` for single-unit formats.
    pub unit_index: usize,
}

/// A bounded slice of a [`RawTextUnit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Passage {
    /// Stable identifier: `{source}#{unit_index}:{chunk_index}`.
    pub id: String,
    pub text: String,
    pub source: String,
    pub unit_index: usize,
    pub chunk_index: usize,
    /// Char offset (inclusive) into the unit's text.
    pub start: usize,
    /// Char offset (exclusive) into the unit's text.
    pub end: usize,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A passage paired with its embedding vector.
#[derive(Debug, Clone)]
pub struct EmbeddedPassage {
    pub passage: Passage,
    pub vector: Vec<f32>,
}

/// Metadata of a named, dimensioned collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dims: usize,
    pub model: String,
}

/// A passage returned from a similarity query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Run state, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Scanning,
    Loading,
    Chunking,
    Embedding,
    Upserting,
    Persisted,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Scanning => "scanning",
            PipelineState::Loading => "loading",
            PipelineState::Chunking => "chunking",
            PipelineState::Embedding => "embedding",
            PipelineState::Upserting => "upserting",
            PipelineState::Persisted => "persisted",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful (possibly cancelled) ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub collection: String,
    /// Files loaded successfully (including files with no text).
    pub loaded: usize,
    pub skipped: Vec<SkippedFile>,
    /// Passages present in the collection for the loaded files after the run.
    pub passages_indexed: usize,
    /// Passages embedded and upserted during this run.
    pub passages_embedded: usize,
    /// Passages whose identifier and content were already indexed.
    pub passages_unchanged: usize,
    /// Stale passages removed from changed files.
    pub pruned: usize,
    pub failed_passages: Vec<FailedPassage>,
    /// Passages produced but not flushed because the run was cancelled.
    pub pending_on_cancel: usize,
    pub cancelled: bool,
    pub state: PipelineState,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
}

impl IngestionReport {
    pub(crate) fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            loaded: 0,
            skipped: Vec::new(),
            passages_indexed: 0,
            passages_embedded: 0,
            passages_unchanged: 0,
            pruned: 0,
            failed_passages: Vec::new(),
            pending_on_cancel: 0,
            cancelled: false,
            state: PipelineState::Scanning,
            duration: Duration::ZERO,
        }
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
