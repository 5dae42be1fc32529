//! TOML configuration.
//!
//! All paths, the collection name, chunking parameters, the embedding
//! provider and the extension → loader map live here and are passed into
//! the pipeline explicitly. Directory creation is a separate, idempotent
//! step ([`Config::ensure_directories`]).
//!
//! ```toml
//! [paths]
//! source_dir = "./data/proposal-documents"
//! index_dir = "./data/vectorstore"
//! collection_name = "proposal-documents"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [loaders]
//! pdf = "pdf"
//! docx = "word"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::loader::LoaderKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_loaders")]
    pub loaders: BTreeMap<String, LoaderKind>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub source_dir: PathBuf,
    pub index_dir: PathBuf,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

fn default_collection_name() -> String {
    "proposal-documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: Some(DEFAULT_HASH_DIMS),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
            url: None,
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

/// Vector size of the offline `hash` provider when `dims` is not set.
pub const DEFAULT_HASH_DIMS: usize = 256;

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_flush_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_file_bytes: default_max_file_bytes(),
            recursive: false,
            exclude_globs: Vec::new(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

/// Extension → loader map used when `[loaders]` is absent.
pub fn default_loaders() -> BTreeMap<String, LoaderKind> {
    [
        ("pdf", LoaderKind::Pdf),
        ("docx", LoaderKind::Word),
        ("txt", LoaderKind::Text),
        ("md", LoaderKind::Text),
        ("pptx", LoaderKind::Slides),
        ("xlsx", LoaderKind::Sheet),
        ("xls", LoaderKind::LegacySheet),
    ]
    .into_iter()
    .map(|(ext, kind)| (ext.to_string(), kind))
    .collect()
}

impl EmbeddingConfig {
    /// Providers that need an explicit `dims`.
    fn requires_dims(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }
}

impl Config {
    /// Configuration rooted at `base`: `base/data/proposal-documents` and
    /// `base/data/vectorstore`, offline `hash` embeddings.
    pub fn with_base_dir(base: &Path) -> Self {
        Self {
            paths: PathsConfig {
                source_dir: base.join("data").join("proposal-documents"),
                index_dir: base.join("data").join("vectorstore"),
                collection_name: default_collection_name(),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            loaders: default_loaders(),
            pipeline: PipelineConfig::default(),
        }
    }

    /// Path of the SQLite database backing the index.
    pub fn index_db_path(&self) -> PathBuf {
        self.paths.index_dir.join("index.sqlite")
    }

    /// Create the source and index directories if they are missing.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.paths.source_dir, &self.paths.index_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Check invariants that do not depend on the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.paths.collection_name.trim().is_empty() {
            bail!("paths.collection_name must not be empty");
        }

        if self.pipeline.max_concurrency == 0 {
            bail!("pipeline.max_concurrency must be > 0");
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.requires_dims() {
            if self.embedding.dims.is_none() {
                bail!(
                    "embedding.dims must be set when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.embedding.provider.as_str() {
            "hash" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
                other
            ),
        }

        crate::scan::build_globset(&self.pipeline.exclude_globs)
            .context("pipeline.exclude_globs contains an invalid pattern")?;

        for ext in self.loaders.keys() {
            if ext.is_empty() || ext.starts_with('.') {
                bail!(
                    "loaders: extension keys are written without a leading dot, got '{}'",
                    ext
                );
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.loaders = config
        .loaders
        .into_iter()
        .map(|(ext, kind)| (ext.to_ascii_lowercase(), kind))
        .collect();

    config.validate()?;
    Ok(config)
}
