//! Vector store interface and helpers
//!
//! The index itself is LanceDB (see `lance.rs`); this file holds the shared
//! interface plus the similarity and chunking helpers.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::document::Document;

// ============================================================================
// Types
// ============================================================================

/// Entry written to the store
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// Stable id: re-ingesting the same passage replaces it
    pub id: String,
    pub document: Document,
    pub embedding: Vec<f32>,
}

impl VectorEntry {
    /// Build an entry whose id is derived from file name and chunk index
    pub fn new(document: Document, chunk_index: usize, embedding: Vec<f32>) -> Self {
        let id = entry_id(&document.metadata.filename, chunk_index);
        Self {
            id,
            document,
            embedding,
        }
    }
}

/// Search hit
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    /// Higher is more similar
    pub similarity: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// Similarity index over embedded documents
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert entries, replacing any with the same id
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// At most `k` results, most similar first
    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    /// Stored entry count
    async fn count(&self) -> Result<usize>;

    /// Remove every entry ingested from `filename`
    async fn delete_by_filename(&self, filename: &str) -> Result<usize>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Stable entry id (hex SHA-256 of `filename#chunk`)
pub fn entry_id(filename: &str, chunk_index: usize) -> String {
    let digest = Sha256::digest(format!("{}#{}", filename, chunk_index).as_bytes());
    format!("{:x}", digest)
}

/// Cosine similarity in -1.0 ..= 1.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Split text into word windows
///
/// `chunk_size` words per chunk, consecutive chunks share `overlap` words.
/// A `chunk_size` of 0 returns the whole text as one chunk.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.is_empty() {
        return vec![];
    }

    if chunk_size == 0 || words.len() <= chunk_size {
        return vec![text.trim().to_string()];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));

        if end >= words.len() {
            break;
        }

        start += step;
    }

    chunks
}

// ============================================================================
// Tests
// ============================================================================
