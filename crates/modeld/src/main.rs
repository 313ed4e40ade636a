//! Shot model service
//!
//! Serves shot outcome predictions, records observed outcomes, watches for
//! predictive drift and retrains models in the background.

use anyhow::{Context, Result};
use model_lib::{
    drift::DriftDetector,
    health::{components, HealthRegistry},
    observability::{LifecycleMetrics, StructuredLogger},
    prediction_log::PredictionLogger,
    retrain::{RetrainOrchestrator, StateStore},
    training::{JsonlDataSource, ModelTrainer},
    MlCapabilities, ModelLifecycle, ModelStore,
};
use shot_modeld::{api, config::ServiceConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting shot-modeld");

    let config = ServiceConfig::load()?;
    info!(
        port = config.api_port,
        model_dir = %config.model_dir.display(),
        intervals_enabled = config.intervals_enabled,
        "Service configured"
    );

    let capabilities = MlCapabilities::detect(config.intervals_enabled);
    if config.intervals_enabled && !capabilities.intervals_available() {
        warn!("Interval calibration is not compiled in, serving point estimates only");
    }

    let store = ModelStore::open(&config.model_dir).context("Failed to open model store")?;
    let log = Arc::new(
        PredictionLogger::open(&config.prediction_log_dir).context("Failed to open prediction log")?,
    );
    let source = Arc::new(JsonlDataSource::new(&config.training_data_dir));
    let trainer = Arc::new(ModelTrainer::new(config.trainer_config(), capabilities));
    let orchestrator = RetrainOrchestrator::new(
        config.orchestrator_config(),
        trainer,
        store.clone(),
        source,
        StateStore::open(&config.state_dir)?,
    )?;
    let lifecycle = Arc::new(ModelLifecycle::new(
        store.clone(),
        log.clone(),
        capabilities,
        DriftDetector::new(config.drift_config()?),
        orchestrator.clone(),
    ));

    // Publish the version gauge for models already on disk
    let metrics = LifecycleMetrics::new();
    let logger = StructuredLogger::new("shot-modeld");
    let mut known_subjects = log.subjects();
    known_subjects.extend(config.bootstrap_subjects.iter().cloned());
    known_subjects.sort();
    known_subjects.dedup();
    for subject in &known_subjects {
        if let Ok(Some(version)) = store.latest(subject) {
            metrics.set_model_version(subject, version);
        }
    }

    let health_registry = HealthRegistry::new();
    health_registry.register(components::MODEL_STORE).await;
    health_registry.register(components::PREDICTION_LOG).await;
    health_registry.register(components::ORCHESTRATOR).await;
    health_registry.refresh(&lifecycle).await;

    logger.log_startup(SERVICE_VERSION, known_subjects.len());

    let (outcome_tx, outcome_rx) = mpsc::channel(config.outcome_queue_capacity.max(1));
    let consumer = lifecycle.clone().spawn_outcome_consumer(outcome_rx);

    bootstrap(&lifecycle, &config.bootstrap_subjects);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let maintenance = tokio::spawn(maintenance_loop(
        lifecycle.clone(),
        health_registry.clone(),
        config.clone(),
        shutdown_rx.clone(),
    ));

    let app_state = Arc::new(api::AppState::new(
        lifecycle.clone(),
        health_registry.clone(),
        config.default_confidence,
        outcome_tx,
    ));

    // Mark service as ready after initialization
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = shutdown_rx.changed().await;
    }));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(true);

    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }
    let _ = maintenance.await;

    // The API held the last sender; the consumer drains what is queued
    if let Err(e) = consumer.await {
        warn!(error = %e, "Outcome consumer task failed");
    }

    let grace = config.orchestrator_config().training_timeout + Duration::from_secs(5);
    if tokio::time::timeout(grace, orchestrator.wait_idle()).await.is_err() {
        warn!(in_flight = orchestrator.in_flight(), "Retraining still running at shutdown");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Train subjects that have no published model yet
fn bootstrap(lifecycle: &Arc<ModelLifecycle>, subjects: &[String]) {
    for subject in subjects {
        match lifecycle.store().latest(subject) {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => {
                warn!(subject = %subject, error = %e, "Cannot inspect model store");
                continue;
            }
        }

        let lifecycle = lifecycle.clone();
        let subject = subject.clone();
        tokio::spawn(async move {
            match lifecycle.train_now(&subject).await {
                Ok(metadata) => info!(subject = %subject, version = %metadata.version, "Initial model trained"),
                Err(e) => warn!(subject = %subject, error = %e, "Initial training failed"),
            }
        });
    }
}

/// Periodic health refresh and prediction log pruning
async fn maintenance_loop(
    lifecycle: Arc<ModelLifecycle>,
    health: HealthRegistry,
    config: ServiceConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.maintenance_interval_secs.max(1)));
    let retention = config.prediction_retention();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        health.refresh(&lifecycle).await;

        let log = lifecycle.prediction_log().clone();
        let pruned = tokio::task::spawn_blocking(move || log.prune_older_than(retention)).await;
        match pruned {
            Ok(Ok(_)) => health.set_healthy(components::PREDICTION_LOG).await,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to prune prediction log");
                health
                    .set_degraded(components::PREDICTION_LOG, format!("pruning failed: {}", e))
                    .await;
            }
            Err(e) => warn!(error = %e, "Prune task failed"),
        }
    }
}
