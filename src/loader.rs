//! Format loader registry.
//!
//! Maps a file extension to a [`LoaderKind`]; each kind turns one file into
//! zero or more [`RawTextUnit`]s. The mapping is configuration (see
//! [`Config::loaders`](crate::config::Config)), so adding an extension for
//! an existing format needs no code change.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::extract::{self, ExtractError};
use crate::models::RawTextUnit;

/// The fixed set of loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    Pdf,
    Word,
    Text,
    Slides,
    Sheet,
    /// BIFF `.xls` workbooks.
    LegacySheet,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("file is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

impl LoaderKind {
    /// Load `path` into text units keyed by `source`.
    ///
    /// Units are returned in document order, with `unit_index` equal to the
    /// page, slide or sheet position (0-based).
    pub fn load(
        &self,
        path: &Path,
        source: &str,
        max_bytes: u64,
    ) -> Result<Vec<RawTextUnit>, LoadError> {
        let size = std::fs::metadata(path)?.len();
        if size > max_bytes {
            return Err(LoadError::TooLarge {
                size,
                limit: max_bytes,
            });
        }
        let bytes = std::fs::read(path)?;

        let texts = match self {
            LoaderKind::Pdf => extract::extract_pdf_pages(&bytes)?,
            LoaderKind::Word => vec![extract::extract_docx(&bytes)?],
            LoaderKind::Text => vec![String::from_utf8_lossy(&bytes).into_owned()],
            LoaderKind::Slides => extract::extract_pptx_slides(&bytes)?,
            LoaderKind::Sheet => extract::extract_xlsx_sheets(&bytes)?,
            LoaderKind::LegacySheet => extract::extract_xls_sheets(bytes)?,
        };

        Ok(texts
            .into_iter()
            .enumerate()
            .map(|(unit_index, text)| RawTextUnit {
                text,
                source: source.to_string(),
                unit_index,
            })
            .collect())
    }
}

/// Extension → loader lookup.
#[derive(Debug, Clone)]
pub struct LoaderRegistry {
    loaders: BTreeMap<String, LoaderKind>,
}

impl LoaderRegistry {
    pub fn new(loaders: BTreeMap<String, LoaderKind>) -> Self {
        let loaders = loaders
            .into_iter()
            .map(|(ext, kind)| (normalize_extension(&ext), kind))
            .collect();
        Self { loaders }
    }

    /// Resolve an extension (with or without leading dot, any case).
    pub fn resolve(&self, extension: &str) -> Option<LoaderKind> {
        self.loaders.get(&normalize_extension(extension)).copied()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new(crate::config::default_loaders())
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}

/// Lower-cased extension of `path` without the dot, or `""`.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}
