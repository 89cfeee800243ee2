//! attendance-bot - attendance verification service
//!
//! Start-up sequence: CLI -> configuration -> tracing -> database -> router.
//! A chat transport adapter talks to this service over the `/api` routes.

use anyhow::{Context, Result};
use attendance_common::config::{BotConfig, CliOverrides};
use attendance_common::db::init_database;
use attendance_common::events::EventBus;
use attendance_bot::dispatch::Dispatcher;
use attendance_bot::gateway::{ChatGateway, LogOnlyGateway};
use attendance_bot::{build_router, AppState};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Event bus capacity per subscriber
const EVENT_BUS_CAPACITY: usize = 256;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "attendance-bot")]
#[command(about = "Attendance tracking service for the lecture bot and mini-app")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to SQLite database file
    #[arg(short, long, env = "ATTENDANCE_DB_PATH")]
    database: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "ATTENDANCE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = CliOverrides {
        config_path: args.config,
        database_path: args.database,
        port: args.port,
    };
    // Resolved before tracing so the configured level applies; RUST_LOG still wins
    let resolved = BotConfig::resolve(&overrides);

    let default_level = resolved
        .as_ref()
        .map(|(config, _)| config.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", default_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Build identification first, before any database work
    info!(
        "Starting attendance-bot v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let (config, config_source) = resolved.context("Failed to resolve configuration")?;
    config_source.log();
    info!("Database path: {}", config.database_path.display());
    info!("Master admins configured: {}", config.master_admin_ids.len());
    if config.master_admin_ids.is_empty() {
        warn!("No master admins configured (MASTER_ADMIN_IDS); roles can only be changed in the database");
    }
    match &config.webapp_url {
        Some(url) => info!("Mini-app URL: {}", url),
        None => warn!("WEBAPP_URL not set; start command replies without a link"),
    }
    if config.api_token.is_none() {
        info!("API authentication disabled (no api_token configured)");
    }

    let pool = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    info!("✓ Database ready");

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let gateway: Arc<dyn ChatGateway> = Arc::new(LogOnlyGateway::new());
    let dispatcher = Dispatcher::new(pool.clone(), &config, event_bus.clone(), gateway);

    let state = AppState::new(pool.clone(), dispatcher, event_bus, config.api_token.clone());
    let app = build_router(state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("attendance-bot listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.close().await;
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
