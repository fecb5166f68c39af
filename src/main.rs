//! Hardware test framework server binary.
//!
//! Composition root: loads settings, builds the broker, catalog, and
//! archive client, then serves observer connections until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rust_htf::catalog::TomlCatalog;
use rust_htf::config::Settings;
use rust_htf::session::{self, AppState};

#[derive(Debug, Parser)]
#[command(name = "rust_htf", about = "Hardware test framework execution engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with RUST_LOG env var, defaulting to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    let catalog = TomlCatalog::load(&settings.catalog.path)
        .with_context(|| format!("loading catalog {}", settings.catalog.path.display()))?;
    info!(
        procedures = catalog.procedures.len(),
        parts = catalog.parts.len(),
        recipes = catalog.recipes.len(),
        "catalog loaded"
    );

    let state = AppState::from_settings(&settings, Arc::new(catalog))?;
    let listener = TcpListener::bind(&settings.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.server.bind_addr))?;
    info!(addr = %settings.server.bind_addr, "listening for observers");

    session::serve(listener, Arc::new(state)).await?;
    Ok(())
}
