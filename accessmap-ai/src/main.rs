//! accessmap-ai - Accessibility Observation Pipeline
//!
//! Accepts photo observations of building entrances, extracts accessibility
//! attributes with an external vision model, and serves aggregated
//! per-entrance records over HTTP + SSE.

use std::path::PathBuf;
use std::sync::Arc;

use accessmap_common::config::{default_config_path, load_toml_config, RootFolderInitializer, RootFolderResolver};
use accessmap_common::events::EventBus;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use accessmap_ai::config::{resolve_vision_api_key, ServiceConfig};
use accessmap_ai::extractors::VisionClient;
use accessmap_ai::services::ImageStore;
use accessmap_ai::AppState;

const MODULE_NAME: &str = "accessmap-ai";

/// Command-line arguments for accessmap-ai
#[derive(Parser, Debug)]
#[command(name = "accessmap-ai")]
#[command(about = "Accessibility observation pipeline")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides [server] port)
    #[arg(short, long, env = "ACCESSMAP_AI_PORT")]
    port: Option<u16>,

    /// Root folder holding the database and stored images
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "ACCESSMAP_AI_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| default_config_path(MODULE_NAME));
    let config: ServiceConfig = config_path
        .as_deref()
        .map(load_toml_config::<ServiceConfig>)
        .unwrap_or_default();

    // Initialize tracing (RUST_LOG wins over the TOML level)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.base.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting accessmap-ai v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match &config_path {
        Some(path) if path.exists() => info!("Config file: {}", path.display()),
        Some(path) => warn!("Config file not found, using compiled defaults: {}", path.display()),
        None => warn!("No config directory on this platform, using compiled defaults"),
    }

    config.pipeline.validate().context("Invalid [pipeline] configuration")?;

    // Resolve root folder and lay out its directories
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder)
        .with_toml_root(config.base.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = accessmap_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let event_bus = EventBus::new(100);

    let api_key = match resolve_vision_api_key(&db_pool, &config.vision).await {
        Ok(key) => key,
        Err(e) => {
            warn!("{}", e);
            warn!("Submissions will fail with model_unavailable until a key is configured");
            String::new()
        }
    };
    let vision = VisionClient::new(&config.vision, api_key, config.pipeline.extraction_timeout())
        .context("Failed to build vision client")?;
    let extractor_configured = vision.is_configured();
    info!(endpoint = %config.vision.endpoint, model = %config.vision.model, configured = extractor_configured, "Vision extractor ready");

    let images = ImageStore::new(initializer.images_path());
    let state = AppState::new(db_pool, event_bus, config.pipeline.clone(), Arc::new(vision), images)
        .with_extractor_configured(extractor_configured);

    let app = accessmap_ai::build_router(state);

    let mut server = config.base.server.clone();
    if let Some(port) = args.port {
        server.port = port;
    }
    let addr = server.bind_address();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install signal handler: {}", e);
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
