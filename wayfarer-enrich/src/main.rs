//! wayfarer-enrich - City Enrichment Service
//!
//! Serves the city view (whose visits trigger first-time enrichment), manual
//! enrichment and audit-log endpoints, and runs the maintenance scheduler
//! (stale-lock sweep, stale-content refresh, visitor recount).
//!
//! Configuration precedence: CLI arguments → environment → TOML → defaults.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wayfarer_common::config::{self, LoggingConfig, TomlConfig};
use wayfarer_common::db::init_database;

use wayfarer_enrich::services::{
    ContentNormalizer, EnrichmentOrchestrator, HttpContentFetcher, MaintenanceScheduler,
    SqliteAuditLog, SqliteLockStore, StaleLockSweeper,
};
use wayfarer_enrich::AppState;

/// Command-line arguments for wayfarer-enrich
#[derive(Parser, Debug)]
#[command(name = "wayfarer-enrich")]
#[command(about = "City enrichment service for Wayfarer")]
#[command(version)]
struct Args {
    /// Bootstrap TOML configuration file
    #[arg(short, long, env = "WAYFARER_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long, env = "WAYFARER_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides the configured port)
    #[arg(short, long, env = "WAYFARER_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(config::default_config_path);
    let mut config = TomlConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;
    config.enrichment.apply_env_overrides();
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging)?;

    info!("Starting wayfarer-enrich (City Enrichment) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;

    let db_path = config.database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let db = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database connection established");

    let locks = Arc::new(SqliteLockStore::new(db.clone()));
    let fetcher = HttpContentFetcher::new(&config.enrichment)
        .context("Failed to build content fetcher")?;
    info!(
        source = %fetcher.base_url(),
        timeout_secs = config.enrichment.fetch_timeout_secs,
        authenticated = config.enrichment.api_key.is_some(),
        "Content source configured"
    );

    let orchestrator = Arc::new(EnrichmentOrchestrator::new(
        db.clone(),
        locks.clone(),
        Arc::new(fetcher),
        ContentNormalizer::new(config.enrichment.max_section_chars),
        Arc::new(SqliteAuditLog::new(db.clone())),
    ));
    let sweeper = Arc::new(StaleLockSweeper::new(
        locks,
        config.maintenance.stale_lock_max_age(),
    ));

    let cancel = CancellationToken::new();
    let scheduler = Arc::new(MaintenanceScheduler::new(
        db.clone(),
        Arc::clone(&orchestrator),
        Arc::clone(&sweeper),
        config.maintenance.clone(),
    ));
    let jobs = scheduler.spawn(cancel.clone());

    let state = AppState::new(db, orchestrator, sweeper);
    let app = wayfarer_enrich::build_router(state);

    let port = args.port.unwrap_or(config.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    for job in jobs {
        match tokio::time::timeout(Duration::from_secs(5), job).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Maintenance job ended abnormally"),
            // Mid-refresh; any lock it holds is recovered by the next sweep
            Err(_) => warn!("Maintenance job did not stop within 5s"),
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over the configured level; output goes to the log file when one is set
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let (file_layer, stderr_layer) = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        None => (None, Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
