//! Reportes Server - Main entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use reportes_core::{
    api::{self, AppState},
    config::Config,
    export::{InMemoryReportStore, Report},
    pipeline::ExportPipeline,
    telemetry::{init_telemetry, TelemetryConfig},
};

#[derive(Debug, Parser)]
#[command(name = "reportes-server", version, about = "Incident report export service")]
struct Args {
    /// Configuration file (TOML, YAML or JSON); environment overrides apply on top
    #[arg(short, long, env = "REPORTES_CONFIG")]
    config: Option<String>,

    /// JSON file with an array of reports to preload into the in-memory store
    #[arg(long, env = "REPORTES_SEED")]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    let telemetry = init_telemetry(&TelemetryConfig {
        logging: config.logging.clone(),
        metrics: config.metrics.clone(),
        ..Default::default()
    })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        max_concurrent_jobs = config.jobs.max_concurrent_jobs,
        transport = ?config.delivery.transport.kind,
        "Starting Reportes server"
    );

    let store = Arc::new(load_store(args.seed.as_deref()).await?);
    tracing::info!(reports = store.len(), "Report store ready");

    let pipeline = ExportPipeline::from_config(&config, store)?;

    let shutdown = CancellationToken::new();
    let queue_processor = pipeline.spawn_queue_processor(shutdown.clone());

    let app = api::build_router(AppState::new(pipeline.clone(), telemetry.metrics));

    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(host, config.server.port);
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    pipeline.shutdown();
    shutdown.cancel();
    if let Err(e) = queue_processor.await {
        tracing::warn!(error = %e, "Queue processor did not stop cleanly");
    }
    tracing::info!(
        pending_notifications = pipeline.delivery().queue_len(),
        "Server shutdown complete"
    );

    Ok(())
}

async fn load_store(seed: Option<&std::path::Path>) -> anyhow::Result<InMemoryReportStore> {
    let Some(path) = seed else {
        return Ok(InMemoryReportStore::new());
    };

    let raw = tokio::fs::read(path).await?;
    let reports: Vec<Report> = serde_json::from_slice(&raw)?;
    Ok(reports.into_iter().collect())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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

    tracing::info!("Shutdown signal received");
}
