//! HTTP front end
//!
//! - `POST /query`: answer a question
//! - `GET /health`: liveness and document count
//! - everything else: static files (the chat page)

mod handlers;
mod router;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::query::QueryEngine;

pub use handlers::{HistoryTurn, QueryRequest, QueryResponse};
pub use router::router;

/// Shared handler state
pub struct AppState {
    pub engine: QueryEngine,
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(engine: QueryEngine, static_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self { engine, static_dir })
    }
}

/// Run the server until Ctrl-C
///
/// # Arguments
/// * `config` - loaded configuration, `server.bind` is the listen address
/// * `memory` - index the source folder in memory instead of opening LanceDB
pub async fn serve(config: &Config, memory: bool) -> Result<()> {
    let engine = QueryEngine::from_config(config, memory).await?;
    let state = AppState::new(engine, config.server.static_dir.clone());

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
