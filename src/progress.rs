//! Ingestion progress reporting.
//!
//! Reports what `pidx ingest` is doing while it runs: how many files have
//! been processed and how many passages have been embedded. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an ingestion run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// Listing the source directory. Total unknown.
    Scanning { dir: String },
    /// `done` of `total` files have been loaded or skipped.
    Loading { done: u64, total: u64 },
    /// `embedded` passages written so far out of `produced` chunked.
    Embedding { embedded: u64, produced: u64 },
    /// Collection persisted with `passages` passages for the loaded files.
    Persisted { collection: String, passages: u64 },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  loading  12 / 40 files".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Scanning { dir } => format!("ingest  scanning {}...\n", dir),
            IngestProgressEvent::Loading { done, total } => format!(
                "ingest  loading  {} / {} files\n",
                format_number(*done),
                format_number(*total)
            ),
            IngestProgressEvent::Embedding { embedded, produced } => format!(
                "ingest  embedding  {} / {} passages\n",
                format_number(*embedded),
                format_number(*produced)
            ),
            IngestProgressEvent::Persisted {
                collection,
                passages,
            } => format!(
                "ingest  persisted  {} ({} passages)\n",
                collection,
                format_number(*passages)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Scanning { dir } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "dir": dir
            }),
            IngestProgressEvent::Loading { done, total } => serde_json::json!({
                "event": "progress",
                "phase": "loading",
                "n": done,
                "total": total
            }),
            IngestProgressEvent::Embedding { embedded, produced } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": embedded,
                "total": produced
            }),
            IngestProgressEvent::Persisted {
                collection,
                passages,
            } => serde_json::json!({
                "event": "progress",
                "phase": "persisted",
                "collection": collection,
                "passages": passages
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
