//! In-process vector store
//!
//! Brute-force cosine search over a `Vec`. Used by tests and by
//! `serve --memory`, where the corpus is embedded at startup and never
//! written to disk.

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::vector::{cosine_similarity, SearchResult, VectorEntry, VectorStore};

#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    entries: RwLock<Vec<VectorEntry>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        let mut stored = self.entries.write().await;

        if let (Some(first), Some(new)) = (stored.first(), entries.first()) {
            if first.embedding.len() != new.embedding.len() {
                bail!(
                    "Embedding dimension mismatch: store has {}, got {}",
                    first.embedding.len(),
                    new.embedding.len()
                );
            }
        }

        for entry in entries {
            match stored.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry.clone(),
                None => stored.push(entry.clone()),
            }
        }

        Ok(entries.len())
    }

    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let stored = self.entries.read().await;

        let mut results: Vec<SearchResult> = stored
            .iter()
            .map(|e| SearchResult {
                document: e.document.clone(),
                similarity: cosine_similarity(query_embedding, &e.embedding),
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);

        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<usize> {
        let mut stored = self.entries.write().await;
        let before = stored.len();
        stored.retain(|e| e.document.metadata.filename != filename);
        Ok(before - stored.len())
    }
}
