//! lossless-dl - playlist lossless downloader service
//!
//! Accepts download jobs over HTTP, resolves each track against slskd and
//! streams progress over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lossless_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lossless_dl::config::{Overrides, ServiceConfig};
use lossless_dl::services::{spawn_sweeper, SlskdClient};
use lossless_dl::{AppState, Components};

/// Command-line arguments for lossless-dl
#[derive(Parser, Debug)]
#[command(name = "lossless-dl")]
#[command(about = "Playlist lossless downloader over slskd")]
#[command(version)]
struct Args {
    /// TOML config file (default: <config dir>/lossless/lossless-dl.toml)
    #[arg(short, long, env = "LOSSLESS_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for service data
    #[arg(short, long, env = "LOSSLESS_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "LOSSLESS_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "LOSSLESS_PORT")]
    port: Option<u16>,

    /// slskd base URL, e.g. http://localhost:5030
    #[arg(long, env = "SLSKD_HOST")]
    slskd_host: Option<String>,

    /// slskd API key
    #[arg(long, env = "SLSKD_API_KEY", hide_env_values = true)]
    slskd_api_key: Option<String>,

    /// Directory slskd writes completed downloads into
    #[arg(long, env = "SLSKD_DOWNLOAD_DIR")]
    slskd_download_dir: Option<PathBuf>,

    /// Where job output directories are created
    #[arg(long, env = "OUTPUT_ROOT")]
    output_root: Option<PathBuf>,

    /// Parallel tracks per job
    #[arg(long, env = "DOWNLOADER_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "LOSSLESS_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            root_folder: self.root_folder.clone(),
            host: self.host.clone(),
            port: self.port,
            slskd_host: self.slskd_host.clone(),
            slskd_api_key: self.slskd_api_key.clone(),
            slskd_download_dir: self.slskd_download_dir.clone(),
            output_root: self.output_root.clone(),
            workers_per_job: self.concurrency,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServiceConfig::load(args.config.as_deref(), args.overrides())
        .context("Failed to load configuration")?;

    // Optional copy of the log in a file, without colour codes
    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    // RUST_LOG wins over the configured level
    let level = &config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("lossless_dl={level},lossless_common={level},tower_http=info").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting lossless-dl v{} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));
    info!("Root folder: {}", config.root_folder.display());
    info!("Output root: {}", config.output_root.display());
    info!("slskd: {} (downloads in {})", config.slskd_host, config.slskd_download_dir.display());

    tokio::fs::create_dir_all(&config.output_root)
        .await
        .with_context(|| format!("Failed to create output root {}", config.output_root.display()))?;

    let backend = Arc::new(
        SlskdClient::new(&config.slskd_host, config.slskd_api_key.clone())
            .context("Failed to create slskd client")?,
    );

    let event_bus = EventBus::new(256);
    let state = AppState::new(backend, event_bus, Components::from_config(&config));

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(Arc::clone(&state.jobs), config.sweep_interval(), shutdown.clone());

    let app = lossless_dl::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    let _ = sweeper.await;
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
