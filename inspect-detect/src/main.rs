//! inspect-detect - Defect Detection Service
//!
//! Serves the inspection tablet UI: defect analysis over HTTP with
//! local/cloud/mock detector fallback, plus the offline application shell.
//!
//! Configuration priority: command line → environment → TOML file → defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use inspect_common::config::{load_config, resolve_config_path, TomlConfig};
use inspect_common::logging::init_logging;
use inspect_detect::shell_cache::{
    CacheStorage, DiskCacheStorage, HttpFetcher, MemoryCacheStorage, OfflineShell, ShellManifest,
};
use inspect_detect::{AppState, DetectorRegistry};

const MODULE_NAME: &str = "inspect-detect";

/// Timeout for each shell asset request
const SHELL_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Command-line arguments for inspect-detect
#[derive(Parser, Debug)]
#[command(name = "inspect-detect")]
#[command(about = "Defect detection service for apartment inspections")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "INSPECT_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "INSPECT_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(short, long, env = "INSPECT_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), MODULE_NAME);
    let mut config = load_config(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!("Starting {} v{}", MODULE_NAME, env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!(path = %path.display(), "Configuration file"),
        None => info!("No configuration file found, using defaults"),
    }

    let registry = Arc::new(
        DetectorRegistry::from_config(&config.detectors).context("Failed to configure detectors")?,
    );
    let shell = Arc::new(build_shell(&config).await?);

    let state = AppState::new(registry.clone(), shell.clone());
    tokio::spawn(prime_shell(state.clone()));

    let app = inspect_detect::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    registry.unload_all().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Offline shell over disk storage when `shell.cache_dir` is set, memory otherwise
async fn build_shell(config: &TomlConfig) -> Result<OfflineShell> {
    let manifest = ShellManifest::from_config(&config.shell).context("Invalid shell configuration")?;

    let storage: Arc<dyn CacheStorage> = match &config.shell.cache_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Shell cache on disk");
            Arc::new(
                DiskCacheStorage::open(dir)
                    .await
                    .with_context(|| format!("Failed to open shell cache at {}", dir.display()))?,
            )
        }
        None => {
            info!("Shell cache in memory");
            Arc::new(MemoryCacheStorage::new())
        }
    };

    let fetcher = Arc::new(HttpFetcher::new(SHELL_FETCH_TIMEOUT).context("Failed to build shell fetcher")?);
    Ok(OfflineShell::new(manifest, storage, fetcher))
}

/// Install then activate the shell cache; failures leave any previous cache in place
async fn prime_shell(state: AppState) {
    match state.shell.install().await {
        Ok(_) => match state.shell.activate().await {
            Ok(deleted) => info!(stale_caches = deleted.len(), "Offline shell active"),
            Err(e) => {
                warn!(error = %e, "Offline shell activation failed");
                state.record_error(format!("shell activation failed: {}", e)).await;
            }
        },
        Err(e) => {
            // A previously installed version on disk keeps serving
            warn!(error = %e, "Offline shell install failed");
            state.record_error(format!("shell install failed: {}", e)).await;
        }
    }
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
