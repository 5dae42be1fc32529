//! Shared fixtures for integration tests: document builders and scripted
//! embedding providers.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use proposal_index::config::Config;
use proposal_index::embedding::{EmbeddingProvider, HashEmbedder};
use proposal_index::error::EmbedError;
use tokio_util::sync::CancellationToken;

pub const DIMS: usize = 32;

/// Config rooted at `base` with small chunks and fast retries.
pub fn test_config(base: &Path) -> Config {
    let mut config = Config::with_base_dir(base);
    config.chunking.chunk_size = 40;
    config.chunking.chunk_overlap = 10;
    config.embedding.dims = Some(DIMS);
    config.embedding.batch_size = 8;
    config.embedding.max_retries = 2;
    config.embedding.retry_base_ms = 1;
    config.embedding.flush_interval_ms = 60_000;
    config.pipeline.max_concurrency = 3;
    config.ensure_directories().unwrap();
    config
}

pub fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, contents) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

pub fn docx(text: &str) -> Vec<u8> {
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
        text
    );
    zip_of(&[("word/document.xml", &xml)])
}

pub fn pptx(slides: &[&str]) -> Vec<u8> {
    let xmls: Vec<(String, String)> = slides
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                format!("ppt/slides/slide{}.xml", i + 1),
                format!(
                    "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
                    text
                ),
            )
        })
        .collect();
    let entries: Vec<(&str, &str)> = xmls.iter().map(|(n, x)| (n.as_str(), x.as_str())).collect();
    zip_of(&entries)
}

pub fn xlsx(header: &str, value: &str) -> Vec<u8> {
    let shared = format!("<sst xmlns=\"x\"><si><t>{}</t></si></sst>", header);
    let sheet = format!(
        "<worksheet xmlns=\"x\"><sheetData><row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c></row><row r=\"2\"><c r=\"A2\"><v>{}</v></c></row></sheetData></worksheet>",
        value
    );
    zip_of(&[
        ("xl/sharedStrings.xml", &shared),
        ("xl/worksheets/sheet1.xml", &sheet),
    ])
}

/// Minimal single-page PDF showing `phrase` in Helvetica, with a correct
/// xref table so pdf-extract can parse it.
pub fn pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// A long text with distinct words so every passage differs.
pub fn prose(topic: &str, words: usize) -> String {
    (0..words)
        .map(|i| format!("{}{}", topic, i))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fails the first call with a transient error, then delegates to a
/// [`HashEmbedder`]. Records every call's batch.
pub struct FlakyOnce {
    inner: HashEmbedder,
    calls: AtomicUsize,
    pub batches: Mutex<Vec<Vec<String>>>,
}

impl FlakyOnce {
    pub fn new() -> Self {
        Self {
            inner: HashEmbedder::new(DIMS),
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyOnce {
    fn model_name(&self) -> &str {
        "flaky-once"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.batches.lock().unwrap().push(texts.to_vec());
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(EmbedError::Transient("simulated 503".into()));
        }
        self.inner.embed(texts).await
    }
}

/// Transiently fails any batch containing `poison`, forever.
pub struct Poisoned {
    inner: HashEmbedder,
    poison: String,
}

impl Poisoned {
    pub fn new(poison: &str) -> Self {
        Self {
            inner: HashEmbedder::new(DIMS),
            poison: poison.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for Poisoned {
    fn model_name(&self) -> &str {
        "poisoned"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.iter().any(|t| t.contains(&self.poison)) {
            return Err(EmbedError::Transient("rate limited".into()));
        }
        self.inner.embed(texts).await
    }
}

/// Always fails with a fatal error.
pub struct Unauthorized;

#[async_trait]
impl EmbeddingProvider for Unauthorized {
    fn model_name(&self) -> &str {
        "unauthorized"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Fatal("401 invalid api key".into()))
    }
}

/// Cancels `token` during its first call, then behaves like a hash embedder.
pub struct CancelOnFirstCall {
    inner: HashEmbedder,
    token: CancellationToken,
}

impl CancelOnFirstCall {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            inner: HashEmbedder::new(DIMS),
            token,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CancelOnFirstCall {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.token.cancel();
        self.inner.embed(texts).await
    }
}
