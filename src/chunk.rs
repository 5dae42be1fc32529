//! Fixed-size, overlapping text chunker.
//!
//! Each [`RawTextUnit`] is split independently into windows of `chunk_size`
//! characters whose start advances by `chunk_size - chunk_overlap`. The
//! last window of a unit runs to the end of the text and may be shorter.
//! Whitespace-only units produce no passages.
//!
//! Lengths and offsets count `char`s, not bytes, so splitting never lands
//! inside a multi-byte code point.
//!
//! Each passage receives a deterministic identifier derived from its source
//! and position, plus a SHA-256 hash of its text for change detection.

use sha2::{Digest, Sha256};

use crate::error::IngestError;
use crate::models::{Passage, RawTextUnit};

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// Fails with [`IngestError::ChunkConfig`] unless `0 <= overlap < size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::ChunkConfig(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IngestError::ChunkConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Split every unit; passages never span two units.
    pub fn split(&self, units: &[RawTextUnit]) -> Vec<Passage> {
        units.iter().flat_map(|u| self.split_unit(u)).collect()
    }

    /// Split a single unit into passages with contiguous chunk indices.
    pub fn split_unit(&self, unit: &RawTextUnit) -> Vec<Passage> {
        if unit.text.trim().is_empty() {
            return Vec::new();
        }

        // Byte offset of every char, plus the end of the string.
        let bounds: Vec<usize> = unit
            .text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(unit.text.len()))
            .collect();
        let char_len = bounds.len() - 1;

        let mut passages = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + self.chunk_size).min(char_len);
            let text = &unit.text[bounds[start]..bounds[end]];
            passages.push(make_passage(unit, passages.len(), start, end, text));
            if end == char_len {
                break;
            }
            start += self.step();
        }
        passages
    }
}

pub fn passage_id(source: &str, unit_index: usize, chunk_index: usize) -> String {
    format!("{}#{}:{}", source, unit_index, chunk_index)
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_passage(
    unit: &RawTextUnit,
    chunk_index: usize,
    start: usize,
    end: usize,
    text: &str,
) -> Passage {
    Passage {
        id: passage_id(&unit.source, unit.unit_index, chunk_index),
        text: text.to_string(),
        source: unit.source.clone(),
        unit_index: unit.unit_index,
        chunk_index,
        start,
        end,
        hash: hash_text(text),
    }
}
