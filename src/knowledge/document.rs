//! Documents stored in the vector index

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key of the link appended to answers
pub const MORE_INFO_KEY: &str = "More Info";

/// One indexed passage (a whole page, or one chunk of it)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Plain text sent to the embedding model and to the prompt
    pub page_content: String,
    pub metadata: DocumentMetadata,
}

/// Per-document metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Public URL derived from the file name
    pub base_url: String,
    /// Mirrored file name
    pub filename: String,
    /// JSON object mapping link text to URL
    pub source_urls: Option<String>,
    /// Raw source path, set by loaders that do not extract links
    pub source: Option<String>,
}

impl Document {
    pub fn new(page_content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }
}

impl DocumentMetadata {
    /// Decode `source_urls`
    ///
    /// `Ok(None)` when the field is absent, `Err` when it is not a JSON
    /// object of strings.
    pub fn parse_source_urls(&self) -> serde_json::Result<Option<BTreeMap<String, String>>> {
        self.source_urls
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
    }
}
