//! docs-qa CLI entry point

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = docs_qa::cli::Cli::parse();

    // logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(docs_qa::cli::run(cli))
}
