//! LanceDB vector store
//!
//! One table per collection. Each row is a document passage with its
//! metadata columns and a fixed-size embedding.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::document::{Document, DocumentMetadata};
use super::vector::{SearchResult, VectorEntry, VectorStore};

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB-backed store
pub struct LanceVectorStore {
    db: Connection,
    table_name: String,
    dimension: i32,
}

impl LanceVectorStore {
    /// Open (or create) the database directory
    ///
    /// # Arguments
    /// * `path` - .lance directory
    /// * `collection` - table name
    /// * `dimension` - embedding width
    pub async fn open(path: &Path, collection: &str, dimension: usize) -> Result<Self> {
        if !path.exists() {
            tokio::fs::create_dir_all(path)
                .await
                .context("Failed to create LanceDB directory")?;
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding: {:?}", path))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let dimension = i32::try_from(dimension).context("Embedding dimension too large")?;

        tracing::debug!("Opened LanceDB at {:?} (collection={})", path, collection);

        Ok(Self {
            db,
            table_name: collection.to_string(),
            dimension,
        })
    }

    pub fn collection(&self) -> &str {
        &self.table_name
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("page_content", DataType::Utf8, false),
            Field::new("base_url", DataType::Utf8, false),
            Field::new("filename", DataType::Utf8, false),
            Field::new("source_urls", DataType::Utf8, true),
            Field::new("source", DataType::Utf8, true),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// Entries to an Arrow RecordBatch
    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.len() != self.dimension as usize)
        {
            anyhow::bail!(
                "Embedding dimension mismatch for {}: expected {}, got {}",
                bad.document.metadata.filename,
                self.dimension,
                bad.embedding.len()
            );
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let contents: Vec<&str> = entries
            .iter()
            .map(|e| e.document.page_content.as_str())
            .collect();
        let base_urls: Vec<&str> = entries
            .iter()
            .map(|e| e.document.metadata.base_url.as_str())
            .collect();
        let filenames: Vec<&str> = entries
            .iter()
            .map(|e| e.document.metadata.filename.as_str())
            .collect();
        let source_urls: Vec<Option<&str>> = entries
            .iter()
            .map(|e| e.document.metadata.source_urls.as_deref())
            .collect();
        let sources: Vec<Option<&str>> = entries
            .iter()
            .map(|e| e.document.metadata.source.as_deref())
            .collect();

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(base_urls)),
                Arc::new(StringArray::from(filenames)),
                Arc::new(StringArray::from(source_urls)),
                Arc::new(StringArray::from(sources)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        Ok(names.contains(&self.table_name))
    }

    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(&self.table_name)
            .execute()
            .await
            .with_context(|| format!("Failed to open table {}", self.table_name))?;
        Ok(Some(table))
    }

    fn batch_to_results(batch: &RecordBatch, out: &mut Vec<SearchResult>) -> Result<()> {
        let contents = string_column(batch, "page_content")?;
        let base_urls = string_column(batch, "base_url")?;
        let filenames = string_column(batch, "filename")?;
        let source_urls = string_column(batch, "source_urls")?;
        let sources = string_column(batch, "source")?;

        // _distance is added by LanceDB
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

        let optional = |array: &StringArray, i: usize| {
            (!array.is_null(i)).then(|| array.value(i).to_string())
        };

        for i in 0..batch.num_rows() {
            let metadata = DocumentMetadata {
                base_url: base_urls.value(i).to_string(),
                filename: filenames.value(i).to_string(),
                source_urls: optional(source_urls, i),
                source: optional(sources, i),
            };

            out.push(SearchResult {
                document: Document::new(contents.value(i), metadata),
                // cosine distance is 1 - cosine similarity
                similarity: 1.0 - distances.value(i),
            });
        }

        Ok(())
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            Some(table) => {
                // ids are hex digests, safe to inline
                let id_list = entries
                    .iter()
                    .map(|e| format!("'{}'", e.id))
                    .collect::<Vec<_>>()
                    .join(", ");
                table
                    .delete(&format!("id IN ({})", id_list))
                    .await
                    .context("Failed to delete replaced rows")?;

                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add vectors to table")?;
            }
            None => {
                self.db
                    .create_table(&self.table_name, batches)
                    .execute()
                    .await
                    .context("Failed to create table")?;
                tracing::info!("Created collection {}", self.table_name);
            }
        }

        Ok(entries.len())
    }

    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let Some(table) = self.open_table().await? else {
            tracing::warn!("Collection {} does not exist yet", self.table_name);
            return Ok(vec![]);
        };

        let stream = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut results = Vec::new();
        for batch in &batches {
            Self::batch_to_results(batch, &mut results)?;
        }

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);

        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        match self.open_table().await? {
            Some(table) => table.count_rows(None).await.context("Failed to count rows"),
            None => Ok(0),
        }
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let filter = format!("filename = '{}'", filename.replace('\'', "''"));
        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows for filename")?;

        table
            .delete(&filter)
            .await
            .context("Failed to delete vectors")?;

        Ok(before)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn create_test_entry(filename: &str, chunk_index: usize, axis: usize) -> VectorEntry {
        let mut embedding = vec![0.01; DIM];
        embedding[axis] = 1.0;

        let metadata = DocumentMetadata {
            base_url: format!("https://docs.example.com/{}/", filename),
            filename: filename.to_string(),
            source_urls: Some(r#"{"More Info":"https://docs.example.com/x/"}"#.to_string()),
            source: None,
        };
        VectorEntry::new(
            Document::new(format!("Passage {} of {}", chunk_index, filename), metadata),
            chunk_index,
            embedding,
        )
    }

    async fn open_store(dir: &TempDir) -> LanceVectorStore {
        LanceVectorStore::open(&dir.path().join("test.lance"), "docs", DIM)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lance_store_basic() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.search(&[0.1; DIM], 2).await.unwrap().is_empty());

        let entries = vec![create_test_entry("a", 0, 0), create_test_entry("a", 1, 1)];
        assert_eq!(store.upsert(&entries).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 2);

        // same ids replace instead of duplicating
        store.upsert(&entries).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lance_search_roundtrips_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        store
            .upsert(&[
                create_test_entry("a", 0, 0),
                create_test_entry("b", 0, 1),
                create_test_entry("c", 0, 2),
            ])
            .await
            .unwrap();

        let mut query = vec![0.0; DIM];
        query[1] = 1.0;
        let results = store.search(&query, 2).await.unwrap();

        assert_eq!(results.len(), 2);
        let top = &results[0].document;
        assert_eq!(top.metadata.filename, "b");
        assert_eq!(top.metadata.base_url, "https://docs.example.com/b/");
        assert!(top.metadata.source_urls.is_some());
        assert!(top.metadata.source.is_none());
    }

    #[tokio::test]
    async fn test_lance_delete_by_filename() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        store
            .upsert(&[
                create_test_entry("a", 0, 0),
                create_test_entry("a", 1, 1),
                create_test_entry("b", 0, 2),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_by_filename("a").await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lance_rejects_wrong_dimension() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        let mut entry = create_test_entry("a", 0, 0);
        entry.embedding.pop();
        assert!(store.upsert(&[entry]).await.is_err());
    }
}
