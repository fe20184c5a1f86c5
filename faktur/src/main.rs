//! faktur daemon: invoice ingestion and processing for Polish small
//! businesses.

use anyhow::Context;
use clap::{Parser, Subcommand};
use faktur_core::config::{AppConfig, ENV_LOG_LEVEL, StoreBackend};
use faktur_core::traits::InvoiceStore;
use faktur_export::ExportOptions;
use faktur_store::{JsonFileStore, MemoryStore, SqliteStore};
use faktur_workflow::App;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "faktur", about = "Local invoice ingestion and processing service")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "FAKTUR_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion daemon (default)
    Run,
    /// Render the approved set in an accounting format
    Export {
        /// Format id, e.g. kpir_csv, kpir_xlsx, jpk_pkpir
        format: String,
        /// Output path; defaults to the format's generated filename
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print inbox statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::from_env(),
    };

    let store = build_store(&config).await?;
    let app = App::build(config, store, None)
        .await
        .context("building application")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            app.start();
            info!("faktur running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            app.shutdown().await;
        }
        Command::Export { format, output } => {
            let file = app
                .workflow()
                .export_approved(&format, &ExportOptions::default())
                .await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&file.filename));
            std::fs::write(&path, &file.content)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("wrote {} ({} bytes)", path.display(), file.content.len());
            app.shutdown().await;
        }
        Command::Stats => {
            let stats = app.workflow().inbox().get_stats().await?;
            println!("total: {}", stats.total);
            let mut by_status: Vec<_> = stats.by_status.iter().collect();
            by_status.sort();
            for (status, count) in by_status {
                println!("  {}: {}", status, count);
            }
            let mut by_source: Vec<_> = stats.by_source.iter().collect();
            by_source.sort();
            for (source, count) in by_source {
                println!("  from {}: {}", source, count);
            }
            app.shutdown().await;
        }
    }

    Ok(())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn InvoiceStore>> {
    Ok(match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Json => Arc::new(
            JsonFileStore::open(&config.store.path)
                .with_context(|| format!("opening {}", config.store.path.display()))?,
        ),
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::open(&config.store.path)
                .await
                .with_context(|| format!("opening {}", config.store.path.display()))?,
        ),
    })
}
