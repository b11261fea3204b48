//! Larder server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use larder_core::config::{AppConfig, SigningConfig};
use larder_server::{AppState, create_router};
use larder_signer::UrlSigner;
use std::net::SocketAddr;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Larder - a transparent caching reverse proxy
#[derive(Parser, Debug)]
#[command(name = "larderd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "LARDER_CONFIG",
        default_value = "config/larder.toml"
    )]
    config: String,
}

/// Load configuration (file is optional, env vars can provide/override everything).
fn load_config(path: &str) -> Result<(AppConfig, bool)> {
    let has_config_file = std::path::Path::new(path).exists();
    let mut figment = Figment::new();
    if has_config_file {
        figment = figment.merge(Toml::file(path));
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("LARDER_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    Ok((config, has_config_file))
}

fn init_tracing(timestamps: bool) {
    let (timed, untimed) = if timestamps {
        (Some(tracing_subscriber::fmt::layer()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().without_time()))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(timed)
        .with(untimed)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();
    let (config, has_config_file) = load_config(&args.config)?;

    init_tracing(config.server.log_timestamps);

    // Startup banner
    tracing::info!("Larder v{}", env!("CARGO_PKG_VERSION"));
    if has_config_file {
        tracing::info!(config_path = %args.config, "Loaded configuration from file");
    } else {
        tracing::info!("No config file found at {}, using defaults and environment", args.config);
    }

    // Register Prometheus metrics
    larder_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize storage backend
    let storage = larder_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(
        backend = storage.backend_name(),
        path = %config.storage.path.display(),
        "Storage backend initialized"
    );

    // Verify the cache directory is usable before accepting requests.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;

    // Initialize signer if configured
    let signer = init_signer(config.signing.as_ref()).await;

    tracing::info!(origin = %config.origin.base_url, "Forwarding cache misses");

    // Create application state
    let state = AppState::new(config.clone(), storage, signer)
        .context("failed to initialize application state")?;

    // Create router
    let app = create_router(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    tracing::info!("Listening on {}", addr);

    // Start server with ConnectInfo for the admin allow-list
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Set up signed-URL mode if configured.
///
/// A key that cannot be loaded is logged and the proxy runs unsigned.
async fn init_signer(config: Option<&SigningConfig>) -> Option<UrlSigner> {
    let config = config?;
    match load_signer(config).await {
        Ok(signer) => {
            tracing::warn!(
                "Signed URL mode: inbound URLs are checked for expiry only, signatures are NOT verified"
            );
            Some(signer)
        }
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "Failed to create URL signer, origin requests go out unsigned");
            None
        }
    }
}

/// Load the URL signer from configuration.
async fn load_signer(config: &SigningConfig) -> Result<UrlSigner> {
    let path = &config.private_key_path;
    let key_data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read key file: {}", path.display()))?;
    let signer = UrlSigner::from_pem(
        config.access_id.clone(),
        &key_data,
        config.validity_window(),
    )
    .context("failed to parse signing key")?;
    tracing::info!(
        access_id = %signer.access_id(),
        validity_secs = config.validity_window_secs,
        "Loaded signing key"
    );
    Ok(signer)
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining in-flight requests");
}
