//! Similarity query over an indexed collection.
//!
//! Embeds the query text with the configured provider and returns the `k`
//! nearest passages. Used by `pidx query`.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::embedding::{create_provider, embed_query, EmbeddingProvider, RetryPolicy};
use crate::models::ScoredPassage;
use crate::store::{SqliteStore, VectorStore};

/// Characters of passage text shown in human output.
const SNIPPET_CHARS: usize = 240;

#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub rank: usize,
    pub score: f32,
    pub id: String,
    pub source: String,
    pub unit_index: usize,
    pub chunk_index: usize,
    pub text: String,
}

impl QueryHit {
    fn from_scored(rank: usize, hit: ScoredPassage) -> Self {
        Self {
            rank,
            score: hit.score,
            id: hit.passage.id,
            source: hit.passage.source,
            unit_index: hit.passage.unit_index,
            chunk_index: hit.passage.chunk_index,
            text: hit.passage.text,
        }
    }
}

/// Embed `text` and fetch the `k` most similar passages of `collection`.
pub async fn query_collection(
    provider: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    collection: &str,
    text: &str,
    k: usize,
    retry: RetryPolicy,
) -> Result<Vec<QueryHit>> {
    if text.trim().is_empty() {
        bail!("query text must not be empty");
    }
    let info = match store.collection(collection).await? {
        Some(info) => info,
        None => bail!("Collection '{}' does not exist.", collection),
    };
    if info.dims != provider.dims() {
        bail!(
            "Collection '{}' was built with {} dimensions ({}), but the configured provider yields {} ({}).",
            collection,
            info.dims,
            info.model,
            provider.dims(),
            provider.model_name()
        );
    }

    let vector = embed_query(provider, text, retry).await?;
    let hits = store.query(collection, &vector, k).await?;
    Ok(hits
        .into_iter()
        .enumerate()
        .map(|(i, hit)| QueryHit::from_scored(i + 1, hit))
        .collect())
}

/// Run the query command and print results.
pub async fn run_query(
    config: &Config,
    text: &str,
    k: usize,
    collection: Option<&str>,
    json: bool,
) -> Result<()> {
    let db_path = config.index_db_path();
    if !db_path.exists() {
        bail!(
            "No index at {}. Run `pidx init` and `pidx ingest` first.",
            db_path.display()
        );
    }
    let collection = collection.unwrap_or(&config.paths.collection_name);
    let provider = create_provider(&config.embedding)?;
    let store = SqliteStore::open(&db_path).await?;

    let hits = query_collection(
        provider.as_ref(),
        &store,
        collection,
        text,
        k,
        RetryPolicy::from_config(&config.embedding),
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for hit in &hits {
        let excerpt: String = hit.text.chars().take(SNIPPET_CHARS).collect();
        println!("{}. [{:.3}] {}", hit.rank, hit.score, hit.source);
        println!("    unit: {}  chunk: {}", hit.unit_index, hit.chunk_index);
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", hit.id);
        println!();
    }

    Ok(())
}
