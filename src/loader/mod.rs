//! Ingestion module
//!
//! Reads the mirrored HTML pages, strips them to text, extracts their links
//! and writes embedded documents into the vector store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{bail, Context, Result};
use regex::Regex;
use scraper::{Html, Node, Selector};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::embedding::EmbeddingProvider;
use crate::knowledge::{
    chunk_text, Document, DocumentMetadata, VectorEntry, VectorStore, MORE_INFO_KEY,
};
use crate::links::SiteLinks;

/// Elements whose text never reaches the index
const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

// ============================================================================
// HTML Extraction
// ============================================================================

/// Visible page text with whitespace collapsed
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();

    for node in document.root_element().descendants() {
        let Node::Text(fragment) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|e| SKIPPED_ELEMENTS.contains(&e.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }

        let trimmed = fragment.trim();
        if !trimmed.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(trimmed);
        }
    }

    collapse_whitespace(&text)
}

/// Link text to normalized URL for every anchor with text and a usable href
///
/// A later anchor with the same text replaces an earlier one.
pub fn extract_urls(html: &str, links: &SiteLinks) -> BTreeMap<String, String> {
    let document = Html::parse_document(html);
    let mut urls = BTreeMap::new();

    let Ok(selector) = Selector::parse("a[href]") else {
        return urls;
    };

    for element in document.select(&selector) {
        let text = collapse_whitespace(&element.text().collect::<String>());
        if text.is_empty() {
            continue;
        }

        let Some(href) = element.value().attr("href") else {
            continue;
        };

        if let Some(url) = links.normalize_href(href) {
            urls.insert(text, url);
        }
    }

    urls
}

/// Build the indexed document for one mirrored page
///
/// `source_urls` always carries a "More Info" entry: the page's own
/// "More Info" anchor when present, otherwise the page URL.
pub fn build_document(filename: &str, html: &str, links: &SiteLinks) -> Result<Document> {
    let base_url = links.url_from_filename(filename);
    let page_content = extract_text(html);

    let mut urls = extract_urls(html, links);
    urls.entry(MORE_INFO_KEY.to_string())
        .or_insert_with(|| base_url.clone());

    let source_urls = serde_json::to_string(&urls).context("Failed to encode source URLs")?;

    Ok(Document::new(
        page_content,
        DocumentMetadata {
            base_url,
            filename: filename.to_string(),
            source_urls: Some(source_urls),
            source: None,
        },
    ))
}

fn collapse_whitespace(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));
    re.replace_all(text, " ").trim().to_string()
}

// ============================================================================
// File Collection
// ============================================================================

/// `*.html` files directly inside `folder`, sorted by name
pub fn collect_html_files(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        bail!("Source folder {} does not exist", folder.display());
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Failed to read entry: {}", e);
                continue;
            }
        };

        let is_html = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("html"))
            .unwrap_or(false);

        if entry.file_type().is_file() && is_html {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// Loaded corpus
#[derive(Debug, Default)]
pub struct LoadedCorpus {
    pub documents: Vec<Document>,
    /// Files that could not be read as UTF-8 HTML
    pub skipped: Vec<PathBuf>,
}

/// Read and convert every HTML file in `folder`
pub fn load_html_files(folder: &Path, links: &SiteLinks) -> Result<LoadedCorpus> {
    let files = collect_html_files(folder)?;
    let mut corpus = LoadedCorpus::default();

    for path in files {
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!("Skipping file with non UTF-8 name: {:?}", path);
            corpus.skipped.push(path);
            continue;
        };

        let html = match std::fs::read_to_string(&path) {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                corpus.skipped.push(path);
                continue;
            }
        };

        let document = build_document(filename, &html, links)?;
        corpus.documents.push(document);
    }

    tracing::info!(
        "Loaded {} documents from {} ({} skipped)",
        corpus.documents.len(),
        folder.display(),
        corpus.skipped.len()
    );
    Ok(corpus)
}

/// Delete the persist directory and recreate it empty
pub fn reset_store(persist_dir: &Path) -> Result<()> {
    if persist_dir.exists() {
        std::fs::remove_dir_all(persist_dir).with_context(|| {
            format!("Failed to delete vector store at {}", persist_dir.display())
        })?;
        tracing::info!("Deleted existing vector store: {}", persist_dir.display());
    }

    std::fs::create_dir_all(persist_dir)
        .with_context(|| format!("Failed to create {}", persist_dir.display()))?;
    tracing::info!("Created directory for vector store: {}", persist_dir.display());
    Ok(())
}

// ============================================================================
// Ingestor
// ============================================================================

/// Ingestion summary
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    /// Unreadable files
    pub skipped: usize,
    /// Pages with no text
    pub empty: usize,
    /// Pages whose embedding or upsert failed
    pub failed: usize,
}

/// Load, chunk, embed and store a folder of pages
pub struct Ingestor {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    links: SiteLinks,
    chunk_words: usize,
    chunk_overlap: usize,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        links: SiteLinks,
        config: &IngestConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            links,
            chunk_words: config.chunk_words,
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Ingest every page in `folder`
    pub async fn ingest(&self, folder: &Path) -> Result<IngestReport> {
        let corpus = load_html_files(folder, &self.links)?;
        let total = corpus.documents.len();

        let mut report = IngestReport {
            skipped: corpus.skipped.len(),
            ..Default::default()
        };

        for (i, document) in corpus.documents.into_iter().enumerate() {
            let filename = document.metadata.filename.clone();

            match self.ingest_document(document).await {
                Ok(0) => {
                    tracing::warn!("[{}/{}] {}: no text, skipped", i + 1, total, filename);
                    report.empty += 1;
                }
                Ok(chunks) => {
                    tracing::info!("[{}/{}] {} ({} chunks)", i + 1, total, filename, chunks);
                    report.documents += 1;
                    report.chunks += chunks;
                }
                Err(e) => {
                    tracing::error!("[{}/{}] {} failed: {:#}", i + 1, total, filename, e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Loaded {} documents ({} chunks) into the vector store",
            report.documents,
            report.chunks
        );
        Ok(report)
    }

    /// Returns the number of chunks written
    async fn ingest_document(&self, document: Document) -> Result<usize> {
        // rows of a previous version of the page go first, even if it is now empty
        self.store
            .delete_by_filename(&document.metadata.filename)
            .await?;

        let chunks = chunk_text(&document.page_content, self.chunk_words, self.chunk_overlap);
        if chunks.is_empty() {
            return Ok(0);
        }

        let embeddings = self
            .embedder
            .embed_batch(&chunks)
            .await
            .context("Failed to embed document")?;

        let entries: Vec<VectorEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, embedding))| {
                VectorEntry::new(
                    Document::new(chunk, document.metadata.clone()),
                    i,
                    embedding,
                )
            })
            .collect();

        self.store
            .upsert(&entries)
            .await
            .context("Failed to insert vectors")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::MemoryVectorStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    const PAGE: &str = r##"
        <html>
          <head>
            <title>Subscribe Reports</title>
            <style>body { color: red; }</style>
            <script>var tracking = "secret";</script>
          </head>
          <body>
            <h1>Subscribing to   reports</h1>
            <p>Navigate to the SSRS folder.</p>
            <a href="#top">Back to top</a>
            <a href="/developer/criticalmanufacturing/com/analytics/subscribereports/">More Info</a>
            <a href="https://learn.microsoft.com/sql/reporting-services">Subscriptions
               and Delivery</a>
            <a href="/faq/"></a>
          </body>
        </html>
    "##;

    fn links() -> SiteLinks {
        SiteLinks::new(
            "https://developer.criticalmanufacturing.com",
            "/developer/criticalmanufacturing/com/",
        )
    }

    /// Deterministic embedder: vector of word count and character count
    struct CountingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![
                text.split_whitespace().count() as f32,
                text.len() as f32,
            ])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_extract_text_skips_scripts() {
        let text = extract_text(PAGE);
        assert!(text.contains("Subscribing to reports"));
        assert!(text.contains("Navigate to the SSRS folder."));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("  "));
    }

    #[test]
    fn test_extract_urls() {
        let urls = extract_urls(PAGE, &links());

        assert_eq!(
            urls.get("More Info").map(String::as_str),
            Some("https://developer.criticalmanufacturing.com/analytics/subscribereports/")
        );
        assert_eq!(
            urls.get("Subscriptions and Delivery").map(String::as_str),
            Some("https://learn.microsoft.com/sql/reporting-services")
        );
        // fragment-only and text-less anchors are dropped
        assert!(!urls.contains_key("Back to top"));
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_extract_urls_last_anchor_wins() {
        let html = r#"<a href="/a/">Guide</a><a href="/b/">Guide</a>"#;
        let urls = extract_urls(html, &links());
        assert_eq!(
            urls.get("Guide").map(String::as_str),
            Some("https://developer.criticalmanufacturing.com/b/")
        );
    }

    #[test]
    fn test_build_document_defaults_more_info() {
        let doc = build_document(
            "https___developer_criticalmanufacturing_com_faq.html",
            "<html><body><p>Frequently asked questions</p></body></html>",
            &links(),
        )
        .unwrap();

        assert_eq!(doc.page_content, "Frequently asked questions");
        assert_eq!(doc.metadata.base_url, "https://developer.criticalmanufacturing.com/faq/");
        let urls = doc.metadata.parse_source_urls().unwrap().unwrap();
        assert_eq!(
            urls.get(MORE_INFO_KEY).map(String::as_str),
            Some("https://developer.criticalmanufacturing.com/faq/")
        );
    }

    #[test]
    fn test_collect_html_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.html"), "<p>b</p>").unwrap();
        std::fs::write(dir.path().join("a.HTML"), "<p>a</p>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.html"), "<p>c</p>").unwrap();

        let files = collect_html_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.HTML", "b.html"]);
    }

    #[test]
    fn test_missing_folder_is_error() {
        let err = load_html_files(Path::new("/definitely/not/here"), &links()).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here"));
    }

    #[test]
    fn test_non_utf8_file_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("good.html"), "<p>fine</p>").unwrap();
        std::fs::write(dir.path().join("bad.html"), [0xff, 0xfe, 0x00, 0xc3]).unwrap();

        let corpus = load_html_files(dir.path(), &links()).unwrap();
        assert_eq!(corpus.documents.len(), 1);
        assert_eq!(corpus.skipped.len(), 1);
    }

    #[test]
    fn test_reset_store() {
        let dir = TempDir::new().unwrap();
        let persist = dir.path().join("vectors.lance");
        std::fs::create_dir_all(persist.join("old")).unwrap();

        reset_store(&persist).unwrap();
        assert!(persist.is_dir());
        assert_eq!(std::fs::read_dir(&persist).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_ingest_with_chunking() {
        let dir = TempDir::new().unwrap();
        let words: Vec<String> = (0..25).map(|i| format!("w{}", i)).collect();
        std::fs::write(
            dir.path().join("long.html"),
            format!("<p>{}</p>", words.join(" ")),
        )
        .unwrap();
        std::fs::write(dir.path().join("empty.html"), "<script>x()</script>").unwrap();

        let store = Arc::new(MemoryVectorStore::new());
        let config = IngestConfig {
            chunk_words: 10,
            chunk_overlap: 2,
            ..Default::default()
        };
        let ingestor = Ingestor::new(Arc::new(CountingEmbedder), store.clone(), links(), &config);

        let report = ingestor.ingest(dir.path()).await.unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.empty, 1);
        // windows start at 0, 8, 16 -> 3 chunks
        assert_eq!(report.chunks, 3);
        assert_eq!(store.count().await.unwrap(), 3);

        // re-ingesting replaces instead of duplicating
        ingestor.ingest(dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reingest_emptied_page_removes_rows() {
        let dir = TempDir::new().unwrap();
        let page = dir.path().join("page.html");
        std::fs::write(&page, "<p>Old content about cubes</p>").unwrap();

        let store = Arc::new(MemoryVectorStore::new());
        let ingestor = Ingestor::new(
            Arc::new(CountingEmbedder),
            store.clone(),
            links(),
            &IngestConfig::default(),
        );

        ingestor.ingest(dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        std::fs::write(&page, "<script>only()</script>").unwrap();
        let report = ingestor.ingest(dir.path()).await.unwrap();
        assert_eq!(report.empty, 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
