//! Collection statistics.
//!
//! Summarizes what a collection holds: dimension, embedding model, passage
//! count and a per-source breakdown. Used by `pidx stats`.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::store::{SqliteStore, VectorStore};

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    pub dims: usize,
    pub model: String,
    pub passages: usize,
    pub sources: Vec<SourceStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub passages: usize,
}

/// Gather stats for `collection`, or `None` if it does not exist.
pub async fn collect_stats(
    store: &dyn VectorStore,
    collection: &str,
) -> Result<Option<CollectionStats>> {
    let info = match store.collection(collection).await? {
        Some(info) => info,
        None => return Ok(None),
    };

    let sources = store
        .sources(collection)
        .await?
        .into_iter()
        .map(|(source, passages)| SourceStats { source, passages })
        .collect();

    Ok(Some(CollectionStats {
        collection: info.name,
        dims: info.dims,
        model: info.model,
        passages: store.count(collection).await?,
        sources,
    }))
}

/// Run the stats command: open the index and print a summary.
pub async fn run_stats(config: &Config, collection: Option<&str>, json: bool) -> Result<()> {
    let db_path = config.index_db_path();
    if !db_path.exists() {
        bail!(
            "No index at {}. Run `pidx init` and `pidx ingest` first.",
            db_path.display()
        );
    }
    let collection = collection.unwrap_or(&config.paths.collection_name);
    let store = SqliteStore::open(&db_path).await?;

    let stats = match collect_stats(&store, collection).await? {
        Some(stats) => stats,
        None => bail!("Collection '{}' does not exist.", collection),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    println!("Proposal Index — Collection Stats");
    println!("=================================");
    println!();
    println!("  Index:       {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Collection:  {}", stats.collection);
    println!("  Model:       {}", stats.model);
    println!("  Dimensions:  {}", stats.dims);
    println!("  Passages:    {}", stats.passages);
    println!("  Sources:     {}", stats.sources.len());

    if !stats.sources.is_empty() {
        println!();
        println!("  {:<60} {:>8}", "SOURCE", "PASSAGES");
        println!("  {}", "-".repeat(69));
        for s in &stats.sources {
            println!("  {:<60} {:>8}", s.source, s.passages);
        }
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{hash_text, passage_id};
    use crate::models::{EmbeddedPassage, Passage};
    use crate::store::InMemoryStore;

    fn ep(source: &str, chunk: usize) -> EmbeddedPassage {
        EmbeddedPassage {
            passage: Passage {
                id: passage_id(source, 0, chunk),
                text: "t".into(),
                source: source.into(),
                unit_index: 0,
                chunk_index: chunk,
                start: 0,
                end: 1,
                hash: hash_text("t"),
            },
            vector: vec![1.0, 0.0],
        }
    }

    #[tokio::test]
    async fn stats_group_by_source() {
        let store = InMemoryStore::new();
        store.open_collection("c", 2, "hash-2").await.unwrap();
        store
            .upsert("c", &[ep("/b", 0), ep("/a", 0), ep("/a", 1)])
            .await
            .unwrap();

        let stats = collect_stats(&store, "c").await.unwrap().unwrap();
        assert_eq!(stats.passages, 3);
        assert_eq!(stats.model, "hash-2");
        assert_eq!(stats.sources[0].source, "/a");
        assert_eq!(stats.sources[0].passages, 2);
        assert!(collect_stats(&store, "missing").await.unwrap().is_none());
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
