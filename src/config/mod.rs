//! Configuration module
//!
//! Layered settings: built-in defaults, then an optional TOML file, then
//! environment variables.
//!
//! ```toml
//! [ollama]
//! base_url = "http://localhost:11434"
//! chat_model = "llama3"
//!
//! [query]
//! top_k = 2
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "docs-qa.toml";

/// Persona prompt sent as the first system message of every query
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI Assistant that will answer questions in the context of Critical Manufacturing MES. \
When answering, try to be polite every time. Do not say \"In the context you gave me...\" to start a conversation. \
If required, make a list of steps to do something. Answer with the information you know. Do not give any href links.";

// ============================================================================
// Data Directory
// ============================================================================

/// Data directory (~/.local/share/docs-qa on Linux)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docs-qa")
}

// ============================================================================
// Types
// ============================================================================

/// Full service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ollama: OllamaConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub site: SiteConfig,
    pub query: QueryConfig,
    pub server: ServerConfig,
}

/// Ollama server and model names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embedding_model: String,
    /// Used when the primary embedding model cannot be set up
    pub fallback_embedding_model: String,
    pub chat_model: String,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            fallback_embedding_model: "default-model".to_string(),
            chat_model: "llama3".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Vector store location and shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub persist_dir: PathBuf,
    /// LanceDB table name
    pub collection: String,
    /// Embedding width; must match the embedding model
    pub dimension: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist_dir: get_data_dir().join("vectors.lance"),
            collection: "devhtml2".to_string(),
            dimension: 768,
        }
    }
}

/// Ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub source_folder: PathBuf,
    /// Words per chunk, 0 embeds each page as a single document
    pub chunk_words: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_folder: PathBuf::from("./SourceFiles"),
            chunk_words: 0,
            chunk_overlap: 50,
        }
    }
}

/// Public documentation site the local HTML files were saved from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    /// Path prefix left behind by the offline mirror, rewritten to `/`
    pub mirror_prefix: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://developer.criticalmanufacturing.com".to_string(),
            mirror_prefix: "/developer/criticalmanufacturing/com/".to_string(),
        }
    }
}

/// Query pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Documents retrieved per question
    pub top_k: usize,
    pub system_prompt: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 2,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// HTTP front end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory holding index.html and its assets
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            static_dir: PathBuf::from("."),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load configuration
    ///
    /// An explicit `path` must exist. Without one, `docs-qa.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup (environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("OLLAMA_HOST") {
            self.ollama.base_url = normalize_ollama_host(&host);
        }
        if let Some(model) = get("DOCS_QA_EMBED_MODEL") {
            self.ollama.embedding_model = model;
        }
        if let Some(model) = get("DOCS_QA_CHAT_MODEL") {
            self.ollama.chat_model = model;
        }
        if let Some(dir) = get("DOCS_QA_PERSIST_DIR") {
            self.store.persist_dir = PathBuf::from(dir);
        }
        if let Some(bind) = get("DOCS_QA_BIND") {
            self.server.bind = bind;
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.query.top_k == 0 {
            bail!("query.top_k must be at least 1");
        }
        if self.store.dimension == 0 {
            bail!("store.dimension must be greater than 0");
        }
        if self.store.collection.trim().is_empty() {
            bail!("store.collection must not be empty");
        }
        if self.ollama.base_url.trim().is_empty() {
            bail!("ollama.base_url must not be empty");
        }
        if self.ollama.embedding_model.trim().is_empty() || self.ollama.chat_model.trim().is_empty()
        {
            bail!("ollama model names must not be empty");
        }
        if !self.site.base_url.starts_with("http://") && !self.site.base_url.starts_with("https://")
        {
            bail!("site.base_url must start with http:// or https://");
        }
        if self.ingest.chunk_words > 0 && self.ingest.chunk_overlap >= self.ingest.chunk_words {
            bail!(
                "ingest.chunk_overlap ({}) must be smaller than ingest.chunk_words ({})",
                self.ingest.chunk_overlap,
                self.ingest.chunk_words
            );
        }
        Ok(())
    }
}

/// `OLLAMA_HOST` is often given as `host:port`
fn normalize_ollama_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

// ============================================================================
// Tests
// ============================================================================
