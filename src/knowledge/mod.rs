//! Knowledge module - document vector store
//!
//! - Document: passage text plus page metadata
//! - VectorStore: similarity search interface
//! - LanceDB: persistent store used by ingest and serve
//! - Memory: in-process store for tests and `serve --memory`

mod document;
mod lance;
mod memory;
mod vector;

// Re-exports
pub use document::{Document, DocumentMetadata, MORE_INFO_KEY};
pub use lance::LanceVectorStore;
pub use memory::MemoryVectorStore;
pub use vector::{
    chunk_text, cosine_similarity, entry_id, SearchResult, VectorEntry, VectorStore,
};
