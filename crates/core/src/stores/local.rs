//! Process-local vector collection.
//!
//! Records are kept in insertion order and searched by brute-force cosine
//! similarity. When opened on a directory, the whole collection is rewritten
//! to `<dir>/<collection>.json` after every mutating call, so there is no
//! separate flush step. Concurrent writers from several processes are not
//! coordinated.

use crate::traits::VectorStore;
use crate::{ChunkRecord, RetrievedChunk, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collection {
    records: Vec<ChunkRecord>,
}

impl Collection {
    fn dimensions(&self) -> Option<usize> {
        self.records.first().map(|record| record.embedding.len())
    }
}

pub struct LocalStore {
    path: Option<PathBuf>,
    collection: RwLock<Collection>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            collection: RwLock::new(Collection::default()),
        }
    }

    /// Opens (or creates) the named collection inside `dir`.
    pub async fn open(dir: impl AsRef<Path>, collection: &str) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{collection}.json"));

        let loaded = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Collection>(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Collection::default(),
            Err(error) => return Err(error.into()),
        };

        debug!(path = %path.display(), records = loaded.records.len(), "opened local store");

        Ok(Self {
            path: Some(path),
            collection: RwLock::new(loaded),
        })
    }

    async fn persist(&self, collection: &Collection) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(collection)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for LocalStore {
    async fn add(&self, records: &[ChunkRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut collection = self.collection.write().await;

        let expected = collection
            .dimensions()
            .unwrap_or(records[0].embedding.len());
        if let Some(wrong) = records
            .iter()
            .find(|record| record.embedding.len() != expected)
        {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: wrong.embedding.len(),
            });
        }

        let mut seen: HashSet<&str> = collection
            .records
            .iter()
            .map(|record| record.chunk.id.as_str())
            .collect();
        for record in records {
            if !seen.insert(record.chunk.id.as_str()) {
                return Err(StoreError::Conflict {
                    id: record.chunk.id.clone(),
                });
            }
        }

        collection.records.extend(records.iter().cloned());
        if let Err(error) = self.persist(&collection).await {
            let keep = collection.records.len() - records.len();
            collection.records.truncate(keep);
            return Err(error);
        }

        debug!(added = records.len(), total = collection.records.len(), "added chunk records");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, StoreError> {
        let collection = self.collection.read().await;

        if let Some(expected) = collection.dimensions() {
            if expected != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut scored: Vec<(f32, &ChunkRecord)> = collection
            .records
            .iter()
            .map(|record| (cosine_similarity(vector, &record.embedding), record))
            .collect();

        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, record)| RetrievedChunk {
                id: record.chunk.id.clone(),
                source: record.chunk.source.clone(),
                text: record.chunk.text.clone(),
                score,
            })
            .collect())
    }

    async fn list_by_source(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        let collection = self.collection.read().await;
        let mut counts = BTreeMap::new();
        for record in &collection.records {
            *counts.entry(record.chunk.source.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn delete_by_source(&self, source: &str) -> Result<usize, StoreError> {
        let mut collection = self.collection.write().await;
        let remaining = Collection {
            records: collection
                .records
                .iter()
                .filter(|record| record.chunk.source != source)
                .cloned()
                .collect(),
        };
        let deleted = collection.records.len() - remaining.records.len();

        // Memory only changes once the file does.
        if deleted > 0 {
            self.persist(&remaining).await?;
            *collection = remaining;
        }

        debug!(source, deleted, "deleted chunk records");
        Ok(deleted)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut collection = self.collection.write().await;
        let empty = Collection::default();
        self.persist(&empty).await?;
        *collection = empty;
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.collection.read().await.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Chunk;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(source: &str, index: u64, text: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            chunk: Chunk::new(source, index, text),
            embedding,
            ingested_at: Utc::now(),
        }
    }

    fn sample_records() -> Vec<ChunkRecord> {
        vec![
            record("a.txt", 0, "alpha", vec![1.0, 0.0, 0.0]),
            record("a.txt", 1, "beta", vec![0.0, 1.0, 0.0]),
            record("b.txt", 0, "gamma", vec![0.0, 0.0, 1.0]),
        ]
    }

    #[tokio::test]
    async fn query_orders_by_similarity() {
        let store = LocalStore::in_memory();
        store.add(&sample_records()).await.unwrap();

        let hits = store.query(&[0.9, 0.1, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "alpha");
        assert_eq!(hits[1].text, "beta");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn empty_store_returns_no_hits() {
        let store = LocalStore::in_memory();
        let hits = store.query(&[1.0, 0.0], 3).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn duplicate_ids_reject_the_whole_batch() {
        let store = LocalStore::in_memory();
        store.add(&sample_records()).await.unwrap();

        let batch = vec![
            record("c.txt", 0, "new", vec![1.0, 1.0, 0.0]),
            record("a.txt", 1, "again", vec![1.0, 0.0, 1.0]),
        ];
        let result = store.add(&batch).await;
        assert!(matches!(result, Err(StoreError::Conflict { ref id }) if id == "a.txt_chunk_1"));
        assert_eq!(store.count().await.unwrap(), 3);
        assert!(!store.list_by_source().await.unwrap().contains_key("c.txt"));
    }

    #[tokio::test]
    async fn delete_by_source_leaves_other_documents() {
        let store = LocalStore::in_memory();
        store.add(&sample_records()).await.unwrap();

        assert_eq!(store.delete_by_source("a.txt").await.unwrap(), 2);
        assert_eq!(store.delete_by_source("a.txt").await.unwrap(), 0);

        let listing = store.list_by_source().await.unwrap();
        assert!(!listing.contains_key("a.txt"));
        assert_eq!(listing.get("b.txt"), Some(&1));
    }

    #[tokio::test]
    async fn clear_empties_listing_and_queries() {
        let store = LocalStore::in_memory();
        store.add(&sample_records()).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.list_by_source().await.unwrap().is_empty());
        assert!(store.query(&[1.0, 0.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_rejected() {
        let store = LocalStore::in_memory();
        store.add(&sample_records()).await.unwrap();

        let result = store.add(&[record("d.txt", 0, "flat", vec![1.0])]).await;
        assert!(matches!(result, Err(StoreError::DimensionMismatch { .. })));
        assert!(store.query(&[1.0], 1).await.is_err());
    }

    #[tokio::test]
    async fn mutations_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let store = LocalStore::open(dir.path(), "documents").await?;
            store.add(&sample_records()).await?;
            store.delete_by_source("b.txt").await?;
        }

        let reopened = LocalStore::open(dir.path(), "documents").await?;
        let listing = reopened.list_by_source().await?;
        assert_eq!(listing.len(), 1);
        assert_eq!(listing.get("a.txt"), Some(&2));
        assert!(dir.path().join("documents.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn failed_writes_leave_memory_untouched() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let db = dir.path().join("db");
        let store = LocalStore::open(&db, "documents").await?;
        store.add(&sample_records()).await?;

        std::fs::remove_dir_all(&db)?;

        assert!(store.delete_by_source("a.txt").await.is_err());
        assert!(store.clear().await.is_err());

        let listing = store.list_by_source().await?;
        assert_eq!(listing.get("a.txt"), Some(&2));
        assert_eq!(listing.get("b.txt"), Some(&1));
        assert_eq!(store.query(&[1.0, 0.0, 0.0], 1).await?[0].text, "alpha");
        Ok(())
    }
}
