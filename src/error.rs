//! Error taxonomy for the ingestion pipeline.
//!
//! Errors fall into two groups:
//!
//! | Kind | Handling |
//! |------|----------|
//! | [`SkipReason`], [`FailedPassage`] | Recovered per file / per passage and listed in the report |
//! | [`IngestError`] | Aborts the run and is surfaced to the caller |
//!
//! [`EmbedError`] and [`StoreError`] are the error types of the two external
//! collaborator traits; the pipeline maps them onto the groups above.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Fatal errors that move a run into the `Failed` state.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Invalid `chunk_size` / `chunk_overlap`. Raised before any I/O.
    #[error("chunk configuration error: {0}")]
    ChunkConfig(String),

    /// Any other invalid pipeline setting, such as a malformed exclude glob.
    #[error("configuration error: {0}")]
    Config(String),

    /// The embedding provider rejected the request in a way retries cannot fix.
    #[error("embedding failed during {stage}: {cause}")]
    EmbeddingFatal { stage: &'static str, cause: String },

    /// The collection was created with a different embedding dimension.
    #[error(
        "collection '{collection}' has dimension {expected}, but the embedding provider yields {actual}"
    )]
    IndexDimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// The persistent index could not be created or opened.
    #[error("index store unavailable at {}: {cause}", path.display())]
    StoreUnavailable { path: PathBuf, cause: String },

    /// The source directory could not be read.
    #[error("source directory unavailable at {}: {cause}", path.display())]
    SourceUnavailable { path: PathBuf, cause: String },

    /// No document was loaded successfully, so nothing was indexed.
    #[error("no documents loaded ({scanned} files scanned, {} skipped)", skipped.len())]
    NoDocumentsLoaded {
        scanned: usize,
        skipped: Vec<SkippedFile>,
    },

    /// Any other store failure during upsert, prune or persist.
    #[error("index store error during {stage}: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    /// Wrap a [`StoreError`] raised at `stage`, lifting dimension mismatches
    /// into their dedicated variant.
    pub fn from_store(stage: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::DimensionMismatch {
                collection,
                expected,
                actual,
            } => IngestError::IndexDimensionMismatch {
                collection,
                expected,
                actual,
            },
            other => IngestError::Store {
                stage,
                source: other,
            },
        }
    }
}

/// Why a file was skipped. Recorded in the report, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// No loader is registered for the file's extension.
    UnsupportedFormat { extension: String },
    /// The loader failed on this specific file.
    LoadFailure { cause: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnsupportedFormat { extension } if extension.is_empty() => {
                write!(f, "unsupported format (no extension)")
            }
            SkipReason::UnsupportedFormat { extension } => {
                write!(f, "unsupported format: .{}", extension)
            }
            SkipReason::LoadFailure { cause } => write!(f, "load failure: {}", cause),
        }
    }
}

/// A skipped file and the reason it was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// A passage that could not be embedded even after per-item retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPassage {
    pub id: String,
    pub source: String,
    pub cause: String,
}

/// Error classification reported by embedding providers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbedError {
    /// Timeouts, rate limits, 5xx responses, connection errors.
    #[error("transient embedding error: {0}")]
    Transient(String),
    /// Authentication, quota, malformed input.
    #[error("fatal embedding error: {0}")]
    Fatal(String),
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::Transient(_))
    }
}

/// Errors raised by [`VectorStore`](crate::store::VectorStore) backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(
        "dimension mismatch in collection '{collection}': expected {expected}, got {actual}"
    )]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("collection '{0}' does not exist")]
    UnknownCollection(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}
