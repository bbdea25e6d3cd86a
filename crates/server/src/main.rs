use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mp3disc_core::{
    load_config_or_default, validate_config, FfmpegTranscoder, TranscodeCoordinator, Transcoder,
};
use mp3disc_server::api::{create_router, spawn_event_forwarder, WsBroadcaster};
use mp3disc_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("mp3disc {} starting", VERSION);

    // Determine config path
    let config_path = std::env::var("MP3DISC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Output directory: {:?}", config.coordinator.output_dir);
    info!(
        "Default pool size: {}",
        config.coordinator.max_concurrent_transcodes
    );

    // A missing encoder only fails individual tracks, so keep serving.
    let transcoder = FfmpegTranscoder::new(config.transcoder.clone());
    match transcoder.validate().await {
        Ok(()) => info!("ffmpeg found at {:?}", config.transcoder.ffmpeg_path),
        Err(e) => warn!("Transcoder unavailable, runs will fail: {}", e),
    }

    let coordinator = Arc::new(TranscodeCoordinator::new(
        config.coordinator.clone(),
        transcoder,
    ));

    // Create WebSocket broadcaster and forward run events to it
    let ws_broadcaster = WsBroadcaster::new(config.coordinator.event_buffer);
    let forwarder = spawn_event_forwarder(&coordinator, ws_broadcaster.clone());
    info!("WebSocket broadcaster initialized");

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&coordinator),
        ws_broadcaster,
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Let in-flight tracks finish as cancelled so no partial output is left.
    let active = coordinator.cancel_all().await;
    for handle in coordinator.runs().await {
        if !handle.is_finished() {
            let report = handle.wait().await;
            info!(run_id = %report.run_id, "{}", report.summary());
        }
    }
    if active > 0 {
        info!("Cancelled {} active run(s)", active);
    }

    forwarder.abort();
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
}
