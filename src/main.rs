//! Fraud Scoring Service - Main Entry Point
//!
//! Serves batch fraud scoring over HTTP: a CSV upload in, one fraud
//! probability per row out. The model is fetched from object storage on
//! first use and cached for the life of the process.

use anyhow::{Context, Result};
use fraud_scoring_service::{
    config::{AppConfig, LoggingConfig},
    metrics::{MetricsReporter, ScoringMetrics},
    models::{ModelCache, ModelLoader},
    server::{router, AppState},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    init_tracing(&config.logging)?;
    info!("Starting Fraud Scoring Service");
    info!(
        container = %config.storage.container,
        meta_file = %config.storage.meta_file,
        model_file = %config.storage.model_file,
        model_format = config.storage.model_format.as_str(),
        "Configuration loaded successfully"
    );
    if config.storage.connection_string.is_none() {
        warn!("STORAGE_CONNECTION_STRING is not set; every request will report the model as unavailable");
    }

    // Initialize metrics
    let metrics = Arc::new(ScoringMetrics::new());

    // Model slot starts empty; the first request (or preload) fills it
    let cache = Arc::new(ModelCache::new(ModelLoader::from_config(&config.storage)));

    if config.server.preload_model {
        match cache.get_or_load().await {
            Some(model) => info!(features = model.features().len(), "Model preloaded"),
            None => warn!("Model preload failed; retrying on the first request"),
        }
    }

    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let app = router(
        AppState::new(cache, metrics.clone()),
        config.server.max_upload_bytes,
    );

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, "Listening for prediction requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    metrics.print_summary();

    Ok(())
}

/// Initialize logging. `RUST_LOG`, when set, takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "fraud_scoring_service={level},tower_http={level}",
            level = logging.level
        ))
    })?;

    match logging.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
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

    info!("Shutdown signal received, draining connections");
}
