//! Source directory scanning.
//!
//! Lists the files under the source directory (top level only unless
//! `recursive`), drops paths matching the exclude globs, and returns them
//! sorted by path. Globs are matched against the path relative to the
//! source directory. Symlinks are followed; entries that cannot be read or
//! are not regular files are returned as skipped.

use anyhow::Result;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{IngestError, SkipReason, SkippedFile};
use crate::loader::extension_of;
use crate::models::SourceDocument;

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub documents: Vec<SourceDocument>,
    pub skipped: Vec<SkippedFile>,
}

impl ScanOutcome {
    /// Number of entries seen, loadable or not.
    pub fn scanned(&self) -> usize {
        self.documents.len() + self.skipped.len()
    }
}

pub fn scan_source_dir(
    root: &Path,
    exclude: &GlobSet,
    recursive: bool,
) -> Result<ScanOutcome, IngestError> {
    let unavailable = |cause: String| IngestError::SourceUnavailable {
        path: root.to_path_buf(),
        cause,
    };

    let root = root
        .canonicalize()
        .map_err(|e| unavailable(e.to_string()))?;
    if !root.is_dir() {
        return Err(unavailable("not a directory".to_string()));
    }

    let mut walker = WalkDir::new(&root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let excluded = |path: &Path| exclude.is_match(path.strip_prefix(&root).unwrap_or(path));
    let mut outcome = ScanOutcome::default();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(unavailable(e.to_string())),
            Err(e) => {
                match e.path() {
                    Some(path) if excluded(path) => {}
                    Some(path) => {
                        tracing::warn!(path = %path.display(), error = %e, "unreadable entry");
                        outcome.skipped.push(SkippedFile {
                            path: path.to_path_buf(),
                            reason: SkipReason::LoadFailure {
                                cause: e.to_string(),
                            },
                        });
                    }
                    None => tracing::warn!(error = %e, "unreadable entry"),
                }
                continue;
            }
        };

        let path = entry.path();
        if entry.file_type().is_dir() || excluded(path) {
            if !entry.file_type().is_dir() {
                tracing::debug!(path = %path.display(), "excluded by glob");
            }
            continue;
        }
        if !entry.file_type().is_file() {
            outcome.skipped.push(SkippedFile {
                path: path.to_path_buf(),
                reason: SkipReason::LoadFailure {
                    cause: "not a regular file".to_string(),
                },
            });
            continue;
        }

        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        outcome.documents.push(SourceDocument {
            path: path.to_path_buf(),
            extension: extension_of(path),
            size_bytes,
            loaded_at: Utc::now(),
        });
    }

    outcome.documents.sort_by(|a, b| a.path.cmp(&b.path));
    outcome.skipped.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(outcome)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
