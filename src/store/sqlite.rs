//! SQLite-backed [`VectorStore`] implementation.
//!
//! One database file holds every collection. Passages of all collections
//! share the `passages` table keyed by `(collection, id)`; embeddings are
//! stored as little-endian `f32` BLOBs and searched brute-force.
//!
//! Each [`upsert`](VectorStore::upsert) runs in a single transaction.
//! [`persist`](VectorStore::persist) checkpoints the WAL into the main
//! database file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::StoreError;
use crate::migrate;
use crate::models::{CollectionInfo, EmbeddedPassage, Passage, ScoredPassage};

use super::{check_dims, top_k, CollectionLocks, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
    locks: CollectionLocks,
}

impl SqliteStore {
    /// Open or create the index at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let pool = db::connect(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {:#}", path.display(), e)))?;
        migrate::run_migrations(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {:#}", path.display(), e)))?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
            locks: CollectionLocks::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn require(&self, name: &str) -> Result<CollectionInfo, StoreError> {
        self.collection(name)
            .await?
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }
}

fn row_to_info(row: &SqliteRow) -> CollectionInfo {
    let dims: i64 = row.get("dims");
    CollectionInfo {
        name: row.get("name"),
        dims: dims as usize,
        model: row.get("model"),
    }
}

fn row_to_passage(row: &SqliteRow) -> Passage {
    let unit_index: i64 = row.get("unit_index");
    let chunk_index: i64 = row.get("chunk_index");
    let start: i64 = row.get("start_char");
    let end: i64 = row.get("end_char");
    Passage {
        id: row.get("id"),
        text: row.get("text"),
        source: row.get("source"),
        unit_index: unit_index as usize,
        chunk_index: chunk_index as usize,
        start: start as usize,
        end: end as usize,
        hash: row.get("hash"),
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn open_collection(
        &self,
        name: &str,
        dims: usize,
        model: &str,
    ) -> Result<CollectionInfo, StoreError> {
        let _guard = self.locks.lock(name).await?;

        if let Some(existing) = self.collection(name).await? {
            if existing.dims != dims {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: existing.dims,
                    actual: dims,
                });
            }
            if existing.model != model {
                tracing::warn!(
                    collection = name,
                    stored_model = %existing.model,
                    model,
                    "collection was built with a different embedding model"
                );
            }
            return Ok(existing);
        }

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO collections (name, dims, model, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(dims as i64)
        .bind(model)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(CollectionInfo {
            name: name.to_string(),
            dims,
            model: model.to_string(),
        })
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        let row = sqlx::query("SELECT name, dims, model FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_info))
    }

    async fn source_hashes(
        &self,
        collection: &str,
        source: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        self.require(collection).await?;
        let rows = sqlx::query("SELECT id, hash FROM passages WHERE collection = ? AND source = ?")
            .bind(collection)
            .bind(source)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("hash")))
            .collect())
    }

    async fn upsert(
        &self,
        collection: &str,
        passages: &[EmbeddedPassage],
    ) -> Result<(), StoreError> {
        let _guard = self.locks.lock(collection).await?;
        let info = self.require(collection).await?;
        check_dims(&info, passages)?;

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for ep in passages {
            let p = &ep.passage;
            sqlx::query(
                r#"
                INSERT INTO passages (collection, id, source, unit_index, chunk_index,
                                      start_char, end_char, text, hash, embedding, indexed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    source = excluded.source,
                    unit_index = excluded.unit_index,
                    chunk_index = excluded.chunk_index,
                    start_char = excluded.start_char,
                    end_char = excluded.end_char,
                    text = excluded.text,
                    hash = excluded.hash,
                    embedding = excluded.embedding,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(collection)
            .bind(&p.id)
            .bind(&p.source)
            .bind(p.unit_index as i64)
            .bind(p.chunk_index as i64)
            .bind(p.start as i64)
            .bind(p.end as i64)
            .bind(&p.text)
            .bind(&p.hash)
            .bind(vec_to_blob(&ep.vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE collections SET updated_at = ? WHERE name = ?")
            .bind(now)
            .bind(collection)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn prune_source(
        &self,
        collection: &str,
        source: &str,
        keep: &HashSet<String>,
    ) -> Result<usize, StoreError> {
        let _guard = self.locks.lock(collection).await?;
        let existing = self.source_hashes(collection, source).await?;
        let stale: Vec<&String> = existing.keys().filter(|id| !keep.contains(*id)).collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for id in &stale {
            sqlx::query("DELETE FROM passages WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(stale.len())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>, StoreError> {
        let info = self.require(collection).await?;
        if vector.len() != info.dims {
            return Err(StoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: info.dims,
                actual: vector.len(),
            });
        }

        let rows = sqlx::query(
            r#"
            SELECT id, source, unit_index, chunk_index, start_char, end_char, text, hash, embedding
            FROM passages
            WHERE collection = ?
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let scored = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ScoredPassage {
                    passage: row_to_passage(row),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(top_k(scored, k))
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        self.require(collection).await?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passages WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn sources(&self, collection: &str) -> Result<Vec<(String, usize)>, StoreError> {
        self.require(collection).await?;
        let rows = sqlx::query(
            "SELECT source, COUNT(*) AS n FROM passages WHERE collection = ? GROUP BY source ORDER BY source",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let n: i64 = row.get("n");
                (row.get("source"), n as usize)
            })
            .collect())
    }

    async fn persist(&self, collection: &str) -> Result<(), StoreError> {
        let _guard = self.locks.lock(collection).await?;
        self.require(collection).await?;
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
