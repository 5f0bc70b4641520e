//! docs-qa - question answering over a mirrored documentation site
//!
//! HTML pages are embedded with Ollama into a LanceDB collection. A question
//! retrieves the closest pages, which ground a chat model's answer, and the
//! answer links back to the public page.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod links;
pub mod llm;
pub mod loader;
pub mod query;
pub mod server;

// Re-exports
pub use config::{get_data_dir, Config};
pub use embedding::{create_embedder, EmbeddingProvider, OllamaEmbedding};
pub use error::{ApiError, QueryError};
pub use knowledge::{
    Document, DocumentMetadata, LanceVectorStore, MemoryVectorStore, SearchResult, VectorEntry,
    VectorStore,
};
pub use links::SiteLinks;
pub use llm::{ChatMessage, ChatModel, OllamaChat};
pub use loader::{IngestReport, Ingestor};
pub use query::{update_history, ChatTurn, QueryAnswer, QueryEngine};
