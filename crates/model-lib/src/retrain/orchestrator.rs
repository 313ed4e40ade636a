//! Retrain orchestrator
//!
//! Turns drift events into at most one background retraining cycle per
//! subject. Event handling is synchronous and never waits for training.

use super::state::{DriftDisposition, RetrainState, RetrainTriggerState, StateStore};
use crate::drift::DriftEvent;
use crate::error::{RetrainError, TrainingError};
use crate::models::ModelVersion;
use crate::observability::{LifecycleMetrics, StructuredLogger};
use crate::store::{ModelMetadata, ModelStore};
use crate::training::{ModelTrainer, TrainOptions, TrainedModel, TrainingDataSource};
use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Default consecutive drift events before a retrain
pub const DEFAULT_DRIFT_THRESHOLD: u32 = 3;

/// Default cooldown after a failed cycle
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Default bound on the fetch-and-train step
pub const DEFAULT_TRAINING_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub drift_threshold: u32,
    pub cooldown: Duration,
    pub training_timeout: Duration,
    /// Published versions kept per subject after a successful cycle
    pub keep_versions: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            training_timeout: DEFAULT_TRAINING_TIMEOUT,
            keep_versions: 5,
        }
    }
}

struct Inner {
    config: OrchestratorConfig,
    trainer: Arc<ModelTrainer>,
    store: ModelStore,
    source: Arc<dyn TrainingDataSource>,
    states: DashMap<String, RetrainTriggerState>,
    persistence: StateStore,
    in_flight: AtomicUsize,
    idle: Notify,
    metrics: LifecycleMetrics,
    logger: StructuredLogger,
}

/// Decrements the in-flight count even if the cycle panics
struct InFlight(Arc<Inner>);

impl InFlight {
    fn start(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(inner.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct RetrainOrchestrator {
    inner: Arc<Inner>,
}

impl RetrainOrchestrator {
    /// Build the orchestrator, restoring persisted trigger state
    pub fn new(
        config: OrchestratorConfig,
        trainer: Arc<ModelTrainer>,
        store: ModelStore,
        source: Arc<dyn TrainingDataSource>,
        persistence: StateStore,
    ) -> Result<Self> {
        let states = DashMap::new();
        for mut state in persistence.load_all()? {
            if state.recover() {
                warn!(
                    subject = %state.subject,
                    consecutive_drift_count = state.consecutive_drift_count,
                    "Retraining was interrupted by a restart, resuming monitoring"
                );
                persistence.save(&state)?;
            }
            states.insert(state.subject.clone(), state);
        }

        info!(subjects = states.len(), "Retrain orchestrator initialized");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                trainer,
                store,
                source,
                states,
                persistence,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                metrics: LifecycleMetrics::new(),
                logger: StructuredLogger::new("shot-model"),
            }),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Record a drift event; schedules a cycle when the threshold is reached.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_drift_event(&self, event: &DriftEvent) -> DriftDisposition {
        let threshold = self.inner.config.drift_threshold;
        let disposition = self
            .inner
            .transition(&event.subject, "drift event", |state| state.on_drift(event.detected_at, threshold));

        self.inner.metrics.inc_drift_event(&event.subject, event.severity);
        self.inner.logger.log_drift(event, &disposition);

        if let DriftDisposition::Triggered { .. } = disposition {
            let guard = InFlight::start(&self.inner);
            let inner = self.inner.clone();
            let subject = event.subject.clone();
            tokio::spawn(async move {
                let _guard = guard;
                inner.transition(&subject, "cycle started", |state| state.begin_retraining(Utc::now()));
                // Failures are fully handled inside the cycle
                let _ = inner.run_cycle(&subject, "drift").await;
            });
        }

        disposition
    }

    /// Run one training cycle now (initial model or operator request)
    pub async fn train_now(&self, subject: &str) -> Result<ModelMetadata, RetrainError> {
        let started = self.inner.transition(subject, "manual training", |state| {
            if state.state.is_busy() {
                false
            } else {
                state.begin_retraining(Utc::now());
                true
            }
        });
        if !started {
            return Err(RetrainError::InProgress {
                subject: subject.to_string(),
            });
        }

        let _guard = InFlight::start(&self.inner);
        self.inner.run_cycle(subject, "manual").await
    }

    /// Wait until no cycle is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn state(&self, subject: &str) -> Option<RetrainTriggerState> {
        self.inner.states.get(subject).map(|s| s.value().clone())
    }

    pub fn states(&self) -> Vec<RetrainTriggerState> {
        self.inner.states.iter().map(|s| s.value().clone()).collect()
    }

    /// Subjects currently cooling down after a failed cycle
    pub fn subjects_in_cooldown(&self) -> Vec<String> {
        self.inner
            .states
            .iter()
            .filter(|s| s.state == RetrainState::Cooldown)
            .map(|s| s.key().clone())
            .collect()
    }
}

impl Inner {
    /// Mutate a subject's state under its shard lock and persist it
    fn transition<R>(&self, subject: &str, reason: &str, f: impl FnOnce(&mut RetrainTriggerState) -> R) -> R {
        let mut entry = self
            .states
            .entry(subject.to_string())
            .or_insert_with(|| RetrainTriggerState::new(subject));

        let before = entry.state;
        let result = f(entry.value_mut());
        let after = entry.state;

        if let Err(e) = self.persistence.save(&entry) {
            warn!(subject = %subject, error = %e, "Failed to persist retrain state");
        }
        drop(entry);

        if before != after {
            self.logger.log_state_change(subject, before, after, reason);
        }
        result
    }

    async fn run_cycle(&self, subject: &str, trigger: &str) -> Result<ModelMetadata, RetrainError> {
        self.metrics.inc_retrain(subject, "started");

        match self.retrain(subject).await {
            Ok(metadata) => {
                self.transition(subject, "model published", |state| {
                    state.retrain_succeeded(Utc::now(), metadata.accuracy.mae)
                });
                self.metrics.inc_retrain(subject, "succeeded");
                self.metrics.set_model_version(subject, metadata.version);
                self.logger.log_model_published(&metadata, trigger);
                Ok(metadata)
            }
            Err(e) => {
                let cooldown = chrono::Duration::from_std(self.config.cooldown)
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                let reason = e.to_string();
                self.transition(subject, "cycle failed", |state| {
                    state.retrain_failed(Utc::now(), reason.clone(), cooldown)
                });
                self.metrics.inc_retrain(subject, "failed");
                self.logger.log_retrain_failed(subject, e.operation(), &reason);
                error!(
                    subject = %subject,
                    operation = e.operation(),
                    trigger = %trigger,
                    error = %reason,
                    "Retraining cycle failed"
                );
                Err(e)
            }
        }
    }

    async fn retrain(&self, subject: &str) -> Result<ModelMetadata, RetrainError> {
        let previous = self.store.latest(subject)?;
        let timeout = self.config.training_timeout;
        let start = Instant::now();

        // A timeout abandons the fit rather than cancelling it: the blocking
        // thread runs to completion and its result is dropped. A later cycle
        // for the same subject may overlap with it.
        let trained = tokio::time::timeout(timeout, self.fetch_and_train(subject, previous))
            .await
            .map_err(|_| RetrainError::Timeout(timeout))??;
        self.metrics.observe_training_duration(start.elapsed().as_secs_f64());

        let TrainedModel { artifact, metadata, .. } = trained;
        let store = self.store.clone();
        let keep = self.config.keep_versions;

        // Publishing is outside the timeout; a timed-out run never gets here
        tokio::task::spawn_blocking(move || -> Result<ModelMetadata, RetrainError> {
            store.save(&artifact, &metadata)?;
            if let Err(e) = store.prune(&metadata.subject, keep) {
                warn!(subject = %metadata.subject, error = %e, "Failed to prune old model versions");
            }
            Ok(metadata)
        })
        .await
        .map_err(|e| RetrainError::Join(e.to_string()))?
    }

    async fn fetch_and_train(
        &self,
        subject: &str,
        previous: Option<ModelVersion>,
    ) -> Result<TrainedModel, RetrainError> {
        let rows = self.source.row_count(subject).await.map_err(RetrainError::Source)?;
        let floor = self.trainer.config().min_training_rows;
        if rows < floor {
            return Err(TrainingError::InsufficientData {
                subject: subject.to_string(),
                required: floor,
                actual: rows,
            }
            .into());
        }

        let dataset = self.source.fetch(subject).await.map_err(RetrainError::Source)?;
        debug!(subject = %subject, rows = dataset.len(), "Fetched training data");

        let trainer = self.trainer.clone();
        let options = TrainOptions::calibrated(previous);
        let trained = tokio::task::spawn_blocking(move || trainer.train(&dataset, &options))
            .await
            .map_err(|e| RetrainError::Join(e.to_string()))??;
        Ok(trained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MlCapabilities;
    use crate::drift::DriftSeverity;
    use crate::models::Dataset;
    use crate::test_support::synthetic_dataset;
    use crate::training::{InMemoryDataSource, TrainerConfig};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Counts calls and optionally stalls or fails
    struct ScriptedSource {
        rows: InMemoryDataSource,
        fetches: AtomicUsize,
        stall: Option<Duration>,
        fail: bool,
    }

    impl ScriptedSource {
        fn with(dataset: Dataset) -> Self {
            let rows = InMemoryDataSource::new();
            rows.insert(dataset);
            Self {
                rows,
                fetches: AtomicUsize::new(0),
                stall: None,
                fail: false,
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TrainingDataSource for ScriptedSource {
        async fn row_count(&self, subject: &str) -> anyhow::Result<usize> {
            self.rows.row_count(subject).await
        }

        async fn fetch(&self, subject: &str) -> anyhow::Result<Dataset> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.fail {
                anyhow::bail!("shot database unavailable");
            }
            self.rows.fetch(subject).await
        }
    }

    fn drift(subject: &str) -> DriftEvent {
        DriftEvent {
            subject: subject.to_string(),
            detected_at: Utc::now(),
            window_mae: 6.0,
            baseline_mae: 2.0,
            window_size: 20,
            threshold: 3.0,
            severity: DriftSeverity::Critical,
            model_version: ModelVersion::new(1),
        }
    }

    fn orchestrator(
        dir: &TempDir,
        source: Arc<ScriptedSource>,
        config: OrchestratorConfig,
    ) -> (RetrainOrchestrator, ModelStore) {
        let store = ModelStore::open(dir.path().join("models")).unwrap();
        let trainer = Arc::new(ModelTrainer::new(TrainerConfig::default(), MlCapabilities::full()));
        let persistence = StateStore::open(dir.path().join("state")).unwrap();
        let orchestrator =
            RetrainOrchestrator::new(config, trainer, store.clone(), source, persistence).unwrap();
        (orchestrator, store)
    }

    #[tokio::test]
    async fn test_four_events_trigger_one_retrain() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::with(synthetic_dataset("Driver", 80, 1)));
        let (orchestrator, store) = orchestrator(&dir, source.clone(), OrchestratorConfig::default());

        let dispositions: Vec<_> = (0..4).map(|_| orchestrator.on_drift_event(&drift("Driver"))).collect();
        let triggered = dispositions
            .iter()
            .filter(|d| matches!(d, DriftDisposition::Triggered { .. }))
            .count();
        assert_eq!(triggered, 1);
        assert_eq!(dispositions[3], DriftDisposition::AlreadyRetraining);

        orchestrator.wait_idle().await;

        assert_eq!(source.fetches(), 1);
        assert_eq!(store.versions("Driver").unwrap().len(), 1);

        let state = orchestrator.state("Driver").unwrap();
        assert_eq!(state.state, RetrainState::Monitoring);
        assert_eq!(state.consecutive_drift_count, 0);
        assert!(state.baseline_mae.is_some());
    }

    #[tokio::test]
    async fn test_failed_training_enters_cooldown_without_second_attempt() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::with(synthetic_dataset("Wedge", 3, 2)));
        let (orchestrator, store) = orchestrator(&dir, source.clone(), OrchestratorConfig::default());

        for _ in 0..3 {
            orchestrator.on_drift_event(&drift("Wedge"));
        }
        orchestrator.wait_idle().await;

        let state = orchestrator.state("Wedge").unwrap();
        assert_eq!(state.state, RetrainState::Cooldown);
        assert!(state.cooldown_until.unwrap() > Utc::now());
        assert!(state.last_failure.unwrap().contains("insufficient data"));
        assert_eq!(orchestrator.subjects_in_cooldown(), vec!["Wedge".to_string()]);

        let disposition = orchestrator.on_drift_event(&drift("Wedge"));
        assert!(matches!(disposition, DriftDisposition::InCooldown { .. }));
        orchestrator.wait_idle().await;

        // Row count gate stopped both attempts before any fetch
        assert_eq!(source.fetches(), 0);
        assert!(store.versions("Wedge").unwrap().is_empty());
        assert_eq!(orchestrator.state("Wedge").unwrap().retrain_attempts, 1);
    }

    #[tokio::test]
    async fn test_source_error_enters_cooldown() {
        let dir = TempDir::new().unwrap();
        let mut scripted = ScriptedSource::with(synthetic_dataset("Driver", 80, 3));
        scripted.fail = true;
        let (orchestrator, _store) = orchestrator(&dir, Arc::new(scripted), OrchestratorConfig::default());

        let err = orchestrator.train_now("Driver").await.unwrap_err();
        assert!(matches!(err, RetrainError::Source(_)));
        assert_eq!(orchestrator.state("Driver").unwrap().state, RetrainState::Cooldown);
    }

    #[tokio::test]
    async fn test_training_timeout_is_never_published() {
        let dir = TempDir::new().unwrap();
        let mut scripted = ScriptedSource::with(synthetic_dataset("Driver", 80, 4));
        scripted.stall = Some(Duration::from_secs(5));
        let config = OrchestratorConfig {
            training_timeout: Duration::from_millis(50),
            ..OrchestratorConfig::default()
        };
        let (orchestrator, store) = orchestrator(&dir, Arc::new(scripted), config);

        let err = orchestrator.train_now("Driver").await.unwrap_err();
        assert!(matches!(err, RetrainError::Timeout(_)));
        assert!(store.versions("Driver").unwrap().is_empty());
        assert_eq!(orchestrator.state("Driver").unwrap().state, RetrainState::Cooldown);
    }

    #[tokio::test]
    async fn test_train_now_publishes_and_sets_baseline() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::with(synthetic_dataset("Driver", 80, 5)));
        let (orchestrator, store) = orchestrator(&dir, source, OrchestratorConfig::default());

        let metadata = orchestrator.train_now("Driver").await.unwrap();
        assert_eq!(store.latest("Driver").unwrap(), Some(metadata.version));
        assert_eq!(
            orchestrator.state("Driver").unwrap().baseline_mae,
            Some(metadata.accuracy.mae)
        );

        let second = orchestrator.train_now("Driver").await.unwrap();
        assert!(second.version > metadata.version);
    }

    #[tokio::test]
    async fn test_train_now_rejected_while_busy() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::with(synthetic_dataset("Driver", 80, 6)));
        let (orchestrator, _store) = orchestrator(&dir, source, OrchestratorConfig::default());

        for _ in 0..3 {
            orchestrator.on_drift_event(&drift("Driver"));
        }
        let err = orchestrator.train_now("Driver").await.unwrap_err();
        assert!(matches!(err, RetrainError::InProgress { .. }));
        orchestrator.wait_idle().await;
    }

    #[tokio::test]
    async fn test_restart_resumes_monitoring_with_counter() {
        let dir = TempDir::new().unwrap();
        let persistence = StateStore::open(dir.path().join("state")).unwrap();
        let mut interrupted = RetrainTriggerState::new("Driver");
        interrupted.state = RetrainState::Retraining;
        interrupted.consecutive_drift_count = 3;
        persistence.save(&interrupted).unwrap();

        let source = Arc::new(ScriptedSource::with(synthetic_dataset("Driver", 80, 7)));
        let (orchestrator, _store) = orchestrator(&dir, source, OrchestratorConfig::default());

        let state = orchestrator.state("Driver").unwrap();
        assert_eq!(state.state, RetrainState::Monitoring);
        assert_eq!(state.consecutive_drift_count, 3);

        let reloaded = StateStore::open(dir.path().join("state")).unwrap().load_all().unwrap();
        assert_eq!(reloaded[0].state, RetrainState::Monitoring);
    }
}
