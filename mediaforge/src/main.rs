use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use process_utils::find_program;
use tracing::{info, warn};

use mediaforge::api::{ApiServer, ApiServerConfig, AppState};
use mediaforge::artifacts::ArtifactManager;
use mediaforge::config::AppConfig;
use mediaforge::logging;
use mediaforge::media::fetch::install_rustls_provider;
use mediaforge::service::MediaService;
use mediaforge::storage::R2Uploader;

/// How often idle rate windows are dropped.
const RATE_WINDOW_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::from_env().context("invalid configuration")?);

    // Keep the guard alive until exit so buffered log lines are flushed
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;
    install_rustls_provider();

    info!(version = env!("CARGO_PKG_VERSION"), "mediaforge starting");
    for program in [&config.engine.ffmpeg_path, &config.engine.ffprobe_path] {
        if find_program(program).is_none() {
            warn!(program = %program, "Engine binary not found; transforms will fail until it is installed");
        }
    }

    let artifacts = Arc::new(ArtifactManager::new(config.artifacts.clone()));
    artifacts.prepare().await?;
    let adopted = artifacts.adopt_existing().await?;
    if adopted > 0 {
        info!(count = adopted, "Adopted outputs from a previous run");
    }

    let mut service = MediaService::from_config(&config, Arc::clone(&artifacts))?;
    if config.r2.is_configured() {
        match R2Uploader::new(config.r2.clone()).await {
            Ok(uploader) => service = service.with_uploader(Arc::new(uploader)),
            Err(e) => warn!(error = %e, "R2 uploader unavailable; uploads will fail"),
        }
    } else {
        info!("R2 is not configured; remote uploads are disabled");
    }

    let state = AppState::new(Arc::clone(&config), Arc::new(service))
        .with_logging_config(Arc::clone(&logging_config));
    let server = ApiServer::with_state(ApiServerConfig::from(config.as_ref()), state.clone());
    let cancel_token = server.cancel_token();

    let sweeper = artifacts.start_sweeper(cancel_token.clone(), config.cleanup_interval);
    let pruner = state
        .rate_limiter
        .start_pruner(cancel_token.clone(), RATE_WINDOW_PRUNE_INTERVAL);
    let log_cleanup = logging_config.start_retention_cleanup(cancel_token.clone());

    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    let served = server.run().await;

    cancel_token.cancel();
    let _ = tokio::join!(sweeper, pruner, log_cleanup);
    artifacts.remove_temp_root().await;
    info!("mediaforge stopped");

    served.context("API server failed")
}
