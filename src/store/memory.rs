//! In-memory [`VectorStore`] implementation for testing.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Query is
//! brute-force cosine similarity over every stored vector. Nothing
//! survives the process, so [`persist`](VectorStore::persist) only counts
//! calls.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::{CollectionInfo, EmbeddedPassage, ScoredPassage};

use super::{check_dims, top_k, CollectionLocks, VectorStore};

struct MemCollection {
    info: CollectionInfo,
    passages: BTreeMap<String, EmbeddedPassage>,
}

#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, MemCollection>>,
    locks: CollectionLocks,
    persist_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times [`persist`](VectorStore::persist) has been called.
    pub fn persist_count(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemCollection>>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Backend("in-memory store poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemCollection>>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Backend("in-memory store poisoned".to_string()))
    }
}

fn unknown(name: &str) -> StoreError {
    StoreError::UnknownCollection(name.to_string())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn open_collection(
        &self,
        name: &str,
        dims: usize,
        model: &str,
    ) -> Result<CollectionInfo, StoreError> {
        let mut collections = self.write()?;
        if let Some(existing) = collections.get(name) {
            if existing.info.dims != dims {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: existing.info.dims,
                    actual: dims,
                });
            }
            return Ok(existing.info.clone());
        }
        let info = CollectionInfo {
            name: name.to_string(),
            dims,
            model: model.to_string(),
        };
        collections.insert(
            name.to_string(),
            MemCollection {
                info: info.clone(),
                passages: BTreeMap::new(),
            },
        );
        Ok(info)
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        Ok(self.read()?.get(name).map(|c| c.info.clone()))
    }

    async fn source_hashes(
        &self,
        collection: &str,
        source: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        let collections = self.read()?;
        let coll = collections.get(collection).ok_or_else(|| unknown(collection))?;
        Ok(coll
            .passages
            .iter()
            .filter(|(_, p)| p.passage.source == source)
            .map(|(id, p)| (id.clone(), p.passage.hash.clone()))
            .collect())
    }

    async fn upsert(
        &self,
        collection: &str,
        passages: &[EmbeddedPassage],
    ) -> Result<(), StoreError> {
        let _guard = self.locks.lock(collection).await?;
        let mut collections = self.write()?;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| unknown(collection))?;
        check_dims(&coll.info, passages)?;
        for p in passages {
            coll.passages.insert(p.passage.id.clone(), p.clone());
        }
        Ok(())
    }

    async fn prune_source(
        &self,
        collection: &str,
        source: &str,
        keep: &HashSet<String>,
    ) -> Result<usize, StoreError> {
        let _guard = self.locks.lock(collection).await?;
        let mut collections = self.write()?;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| unknown(collection))?;
        let stale: Vec<String> = coll
            .passages
            .iter()
            .filter(|(id, p)| p.passage.source == source && !keep.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            coll.passages.remove(id);
        }
        Ok(stale.len())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>, StoreError> {
        let collections = self.read()?;
        let coll = collections.get(collection).ok_or_else(|| unknown(collection))?;
        if vector.len() != coll.info.dims {
            return Err(StoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: coll.info.dims,
                actual: vector.len(),
            });
        }
        let scored = coll
            .passages
            .values()
            .map(|p| ScoredPassage {
                passage: p.passage.clone(),
                score: cosine_similarity(vector, &p.vector),
            })
            .collect();
        Ok(top_k(scored, k))
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let collections = self.read()?;
        let coll = collections.get(collection).ok_or_else(|| unknown(collection))?;
        Ok(coll.passages.len())
    }

    async fn sources(&self, collection: &str) -> Result<Vec<(String, usize)>, StoreError> {
        let collections = self.read()?;
        let coll = collections.get(collection).ok_or_else(|| unknown(collection))?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for p in coll.passages.values() {
            *counts.entry(p.passage.source.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn persist(&self, collection: &str) -> Result<(), StoreError> {
        let _guard = self.locks.lock(collection).await?;
        if !self.read()?.contains_key(collection) {
            return Err(unknown(collection));
        }
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
