//! Vector index store abstraction.
//!
//! The [`VectorStore`] trait is the only way the pipeline touches the
//! persistent index, so backends can be swapped (SQLite on disk,
//! in-memory for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must serialize writes per collection: two concurrent [`upsert`] calls on
//! the same collection never interleave. Both backends use
//! [`CollectionLocks`] for this.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`open_collection`](VectorStore::open_collection) | Create or open a named collection with a fixed dimension |
//! | [`collection`](VectorStore::collection) | Look up collection metadata |
//! | [`source_hashes`](VectorStore::source_hashes) | Existing `id → hash` for one source |
//! | [`upsert`](VectorStore::upsert) | Insert or replace passages by id, atomically per call |
//! | [`prune_source`](VectorStore::prune_source) | Delete a source's passages not in a keep set |
//! | [`query`](VectorStore::query) | Top-k cosine similarity search |
//! | [`count`](VectorStore::count) | Number of passages in a collection |
//! | [`sources`](VectorStore::sources) | Passage count per source |
//! | [`persist`](VectorStore::persist) | Make prior writes durable |
//!
//! [`upsert`]: VectorStore::upsert

pub mod memory;
pub mod sqlite;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::error::StoreError;
use crate::models::{CollectionInfo, EmbeddedPassage, ScoredPassage};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create `name` with `dims`, or open it if it exists.
    ///
    /// Fails with [`StoreError::DimensionMismatch`] if the existing
    /// collection has a different dimension.
    async fn open_collection(
        &self,
        name: &str,
        dims: usize,
        model: &str,
    ) -> Result<CollectionInfo, StoreError>;

    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError>;

    /// `id → hash` of every stored passage whose `source` is exactly `source`.
    async fn source_hashes(
        &self,
        collection: &str,
        source: &str,
    ) -> Result<HashMap<String, String>, StoreError>;

    /// Insert or replace `passages` keyed by id. Either all are written or
    /// none are.
    async fn upsert(&self, collection: &str, passages: &[EmbeddedPassage])
        -> Result<(), StoreError>;

    /// Delete passages of `source` whose id is not in `keep`.
    /// Returns the number deleted.
    async fn prune_source(
        &self,
        collection: &str,
        source: &str,
        keep: &HashSet<String>,
    ) -> Result<usize, StoreError>;

    /// The `k` passages most similar to `vector`, best first.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>, StoreError>;

    async fn count(&self, collection: &str) -> Result<usize, StoreError>;

    /// `(source, passage count)` pairs, sorted by source.
    async fn sources(&self, collection: &str) -> Result<Vec<(String, usize)>, StoreError>;

    async fn persist(&self, collection: &str) -> Result<(), StoreError>;
}

/// One async mutex per collection name.
#[derive(Default)]
pub struct CollectionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `collection`.
    pub async fn lock(&self, collection: &str) -> Result<OwnedMutexGuard<()>, StoreError> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| StoreError::Backend("collection lock table poisoned".to_string()))?;
            locks
                .entry(collection.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        Ok(lock.lock_owned().await)
    }
}

/// Check every vector against the collection dimension.
pub(crate) fn check_dims(
    info: &CollectionInfo,
    passages: &[EmbeddedPassage],
) -> Result<(), StoreError> {
    match passages.iter().find(|p| p.vector.len() != info.dims) {
        Some(bad) => Err(StoreError::DimensionMismatch {
            collection: info.name.clone(),
            expected: info.dims,
            actual: bad.vector.len(),
        }),
        None => Ok(()),
    }
}

/// Sort by descending score and keep the first `k`.
pub(crate) fn top_k(mut scored: Vec<ScoredPassage>, k: usize) -> Vec<ScoredPassage> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.passage.id.cmp(&b.passage.id))
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn collection_lock_serializes_writers() {
        let locks = Arc::new(CollectionLocks::new());
        let guard = locks.lock("a").await.unwrap();

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("a").await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different collection is not blocked.
        let _other = locks.lock("b").await.unwrap();

        drop(guard);
        contender.await.unwrap();
    }
}
