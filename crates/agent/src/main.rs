//! Probe Agent - latency probing with online rate-limit classification
//!
//! This binary probes one target through a SOCKS5 proxy with a pool of
//! workers, classifies each round trip with an online-trained model and
//! appends the labels to a log.

use anyhow::{Context, Result};
use clap::Parser;
use probe_lib::{
    health::{components, HealthRegistry},
    learner::{self, FileModelStore, Learner},
    observability::{ProbeLogger, ProbeMetrics},
    FileLabelLog, ProbePool, ProbeTarget, ProxyTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod cli;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = cli::Cli::parse();
    let config = config::AgentConfig::from_cli(&cli)?;

    let target = ProbeTarget::new(cli.target_host.clone(), cli.target_port).with_tls(config.tls);
    info!(probe_target = %target, workers = config.worker_count, "Starting probe-agent");

    let health_registry = HealthRegistry::with_probe_components().await;
    let metrics = ProbeMetrics::new();
    let logger = ProbeLogger::new(target.to_string());

    // A model file that exists but cannot be verified stops startup here
    let store = Arc::new(FileModelStore::new(config.model_path.clone()));
    let (state, from_disk) = learner::load_or_initialize(store.as_ref(), config.seed)
        .with_context(|| format!("Failed to load model from {}", config.model_path.display()))?;
    metrics.set_model_samples(state.sample_count());
    logger.log_model_loaded(state.sample_count(), from_disk);

    let (learner, learner_handle) = Learner::spawn(state, store, config.learner_config());

    let transport = ProxyTransport::new(config.transport_config())
        .context("Invalid transport configuration")?;
    info!(route = %transport.route(), "Transport configured");

    let label_log = FileLabelLog::open(config.label_log_path.clone())
        .await
        .context("Failed to open label log")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start health and metrics server
    let api_handle = if config.api_port != 0 {
        let app_state = Arc::new(api::AppState::new(health_registry.clone()));
        Some(tokio::spawn(api::serve(
            config.api_port,
            app_state,
            shutdown_tx.subscribe(),
        )))
    } else {
        None
    };

    let pool = ProbePool::builder()
        .transport(Arc::new(transport))
        .learner(learner.clone())
        .label_log(Arc::new(label_log))
        .target(target)
        .health(health_registry.clone())
        .config(config.pool_config())
        .start()
        .await?;
    logger.log_startup(AGENT_VERSION, config.worker_count, config.threshold);

    let outcome = wait_for_shutdown(&pool).await;
    match &outcome {
        Ok(reason) => logger.log_shutdown(reason),
        Err(e) => {
            logger.log_shutdown("workers stopped");
            health_registry
                .set_unhealthy(components::LEARNER, e.to_string())
                .await;
        }
    }

    let report = pool.shutdown().await;
    info!(
        cycles_completed = report.cycles_completed,
        cycles_discarded = report.cycles_discarded,
        transport_failures = report.transport_failures,
        labels_written = report.labels_written,
        labels_dropped = report.labels_dropped,
        "Workers stopped"
    );

    // Final save; a failure here is reported but does not change the exit code
    match learner.shutdown().await {
        Ok(sample_count) => info!(sample_count = sample_count, "Model saved"),
        Err(e) => logger.log_persistence_failure(&e.to_string()),
    }
    drop(learner);
    if let Err(e) = learner_handle.await {
        error!(error = %e, "Learner task failed");
    }

    let _ = shutdown_tx.send(());
    if let Some(handle) = api_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
            Err(e) => warn!(error = %e, "API server task failed"),
        }
    }

    outcome.map(|_| ())
}

/// Wait for SIGINT/SIGTERM, or for every worker to stop on its own
async fn wait_for_shutdown(pool: &ProbePool) -> Result<&'static str> {
    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut watchdog = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            reason = &mut signal => return Ok(reason),
            _ = watchdog.tick() => {
                if pool.is_finished() {
                    anyhow::bail!("All probe workers stopped unexpectedly");
                }
            }
        }
    }
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
