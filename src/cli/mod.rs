//! CLI module
//!
//! docs-qa command definitions and implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

use crate::config::{get_data_dir, Config};
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::knowledge::{LanceVectorStore, VectorStore};
use crate::links::SiteLinks;
use crate::loader::{reset_store, Ingestor};
use crate::query::QueryEngine;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docs-qa")]
#[command(
    version,
    about = "Question answering over a mirrored documentation site",
    long_about = None
)]
pub struct Cli {
    /// Config file (default: ./docs-qa.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Embed the HTML pages of a folder into the vector store
    Ingest {
        /// Folder of mirrored HTML pages
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Delete the vector store before loading
        #[arg(long)]
        reset: bool,
    },

    /// Run the HTTP server
    Serve {
        /// Listen address, e.g. 127.0.0.1:5000
        #[arg(short, long)]
        bind: Option<String>,

        /// Index the source folder in memory instead of using the vector store
        #[arg(long)]
        memory: bool,
    },

    /// Ask one question from the terminal
    Ask {
        /// Question text
        question: String,
    },

    /// Show configuration and store status
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// Run a parsed command
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { source, reset } => cmd_ingest(&config, source, reset).await,
        Commands::Serve { bind, memory } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            crate::server::serve(&config, memory).await
        }
        Commands::Ask { question } => cmd_ask(&config, &question).await,
        Commands::Status => cmd_status(&config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Ingest command
///
/// Loads every `*.html` page in the source folder and upserts its embedding.
async fn cmd_ingest(config: &Config, source: Option<PathBuf>, reset: bool) -> Result<()> {
    let source = source.unwrap_or_else(|| config.ingest.source_folder.clone());
    if !source.is_dir() {
        bail!("Source folder not found: {}", source.display());
    }

    let persist_dir = &config.store.persist_dir;
    if reset {
        println!("[*] Resetting vector store: {}", persist_dir.display());
        reset_store(persist_dir)?;
    }

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(create_embedder(&config.ollama, config.store.dimension)?);
    let store = Arc::new(
        LanceVectorStore::open(persist_dir, &config.store.collection, config.store.dimension)
            .await
            .context("Failed to open vector store")?,
    );

    println!("[*] Loading HTML files from {}", source.display());
    println!("    Embedding model: {}", embedder.name());

    let ingestor = Ingestor::new(
        embedder,
        store.clone(),
        SiteLinks::from_config(&config.site),
        &config.ingest,
    );
    let report = ingestor.ingest(&source).await?;

    println!();
    println!("[OK] Ingestion complete");
    println!("     Documents: {}", report.documents);
    println!("     Chunks:    {}", report.chunks);
    if report.empty > 0 {
        println!("     No text:   {}", report.empty);
    }
    if report.skipped > 0 {
        println!("[!] Unreadable files skipped: {}", report.skipped);
    }
    if report.failed > 0 {
        println!("[!] Failed: {}", report.failed);
    }
    println!("     Stored entries: {}", store.count().await?);

    Ok(())
}

/// Ask command
async fn cmd_ask(config: &Config, question: &str) -> Result<()> {
    let engine = QueryEngine::from_config(config, false).await?;

    println!("[*] Question: \"{}\"", truncate_text(question, 80));

    let answer = engine.handle_query(question, &[]).await?;

    // the link markup is for the browser; print the bare reply and URL instead
    let reply = answer
        .answer
        .split("<br><br>For more information:")
        .next()
        .unwrap_or_default();

    println!();
    println!("{}", reply);
    if let Some(url) = answer.more_info_url {
        println!();
        println!("For more information: {}", url);
    }

    Ok(())
}

/// Status command
async fn cmd_status(config: &Config) -> Result<()> {
    println!("docs-qa v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] Data directory: {}", get_data_dir().display());
    println!("[*] Ollama: {}", config.ollama.base_url);
    println!(
        "    Embedding model: {} (fallback: {})",
        config.ollama.embedding_model, config.ollama.fallback_embedding_model
    );
    println!("    Chat model: {}", config.ollama.chat_model);
    println!("[*] Source folder: {}", config.ingest.source_folder.display());
    println!("[*] Site: {}", config.site.base_url);
    println!(
        "[*] Retrieval: top {} | prompt: {}",
        config.query.top_k,
        truncate_text(&config.query.system_prompt, 60)
    );

    let persist_dir = &config.store.persist_dir;
    if !persist_dir.exists() {
        println!("[!] Vector store not found: {}", persist_dir.display());
        println!("    Run: docs-qa ingest");
        return Ok(());
    }

    println!(
        "[*] Vector store: {} ({})",
        persist_dir.display(),
        format_bytes(dir_size(persist_dir))
    );

    match LanceVectorStore::open(persist_dir, &config.store.collection, config.store.dimension)
        .await
    {
        Ok(store) => match store.count().await {
            Ok(count) => println!("[OK] Collection {}: {} entries", store.collection(), count),
            Err(e) => println!("[!] Failed to count entries: {}", e),
        },
        Err(e) => println!("[!] Failed to open vector store: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Truncate text (UTF-8 safe)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// Human-readable byte size
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

// ============================================================================
// Tests
// ============================================================================
