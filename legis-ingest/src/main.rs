//! legis-ingest - Legislative Document Ingest Service
//!
//! Sweeps a staging directory of heterogeneous legislative source files,
//! parses them into fragments, merges fragments into per-entity aggregates
//! in temporal order, and archives the processed files. Runs either as a
//! one-shot sweep (`--once`) or as an HTTP service accepting run triggers.

use anyhow::Result;
use clap::Parser;
use legis_common::config::PipelineConfig;
use legis_common::db::init_database;
use legis_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use legis_ingest::archive::ArchiveManager;
use legis_ingest::persist::PersistenceCoordinator;
use legis_ingest::pipeline::Pipeline;
use legis_ingest::registry::{SourceRegistry, SweepFilter};
use legis_ingest::AppState;

#[derive(Debug, Parser)]
#[command(name = "legis-ingest", version, about = "Legislative document ingest service")]
struct Cli {
    /// Path to a TOML config file (overrides the platform default location)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run one full sweep and exit instead of serving HTTP
    #[arg(long)]
    once: bool,

    /// HTTP listen port (overrides config)
    #[arg(long, env = "LEGIS_LISTEN_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting legis-ingest v{}", env!("CARGO_PKG_VERSION"));

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.listen_port = port;
    }
    config.ensure_directories()?;
    info!("Staging root: {}", config.staging_root.display());
    info!("Database: {}", config.database_path.display());

    let db = init_database(&config.database_path).await?;
    let event_bus = EventBus::new(100);

    let pipeline = Arc::new(Pipeline::new(
        SourceRegistry::new(&config.staging_root),
        PersistenceCoordinator::new(db.clone(), config.retry.clone()),
        ArchiveManager::new(&config.archive_root, &config.quarantine_root),
        event_bus.clone(),
        config.worker_count,
    ));

    if cli.once {
        let summary = pipeline
            .run(Uuid::new_v4(), SweepFilter::default(), CancellationToken::new())
            .await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        // Non-zero exit when anything was quarantined, for batch schedulers
        if summary.quarantined > 0 {
            std::process::exit(1);
        }
        return Ok(());
    }

    let state = AppState::new(db, event_bus, pipeline);
    let app = legis_ingest::build_router(state);

    let addr = format!("127.0.0.1:{}", config.listen_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
