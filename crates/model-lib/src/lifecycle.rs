//! Lifecycle facade
//!
//! Wires the predictor, the prediction log, the drift detector and the
//! retrain orchestrator into the two flows callers see: serving predictions
//! and reporting observed outcomes.

use crate::capability::MlCapabilities;
use crate::drift::{DriftAssessment, DriftDetector, DriftEvent, DriftWindow};
use crate::error::{LogError, PredictError, RetrainError, StoreError};
use crate::models::{DatasetTier, FeatureMap, ModelVersion, PredictionId};
use crate::observability::{LifecycleMetrics, StructuredLogger};
use crate::prediction_log::PredictionLogger;
use crate::predictor::{PointPrediction, PredictionResult, Predictor};
use crate::retrain::{DriftDisposition, RetrainOrchestrator, RetrainState};
use crate::store::{LoadedModel, ModelMetadata, ModelStore};
use crate::training::AccuracySummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Post-commit notification that a shot's real outcome is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeObserved {
    pub subject: String,
    pub prediction_id: PredictionId,
    pub actual_value: f64,
}

/// Result of the drift check that follows an outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DriftCheck {
    Undetermined { samples: usize, required: usize },
    NoBaseline,
    Stable { window_mae: f64, limit: f64 },
    Drifted {
        event: DriftEvent,
        disposition: DriftDisposition,
    },
    /// The check could not run; the outcome itself was recorded
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub prediction_id: PredictionId,
    pub subject: String,
    pub predicted_value: f64,
    pub actual_value: f64,
    pub absolute_error: f64,
    pub model_version: ModelVersion,
    pub drift: DriftCheck,
}

/// Per-subject view of the serving model and its drift state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealthSnapshot {
    pub subject: String,
    pub model_version: ModelVersion,
    pub trained_at: Option<DateTime<Utc>>,
    pub sample_count: Option<usize>,
    pub accuracy: Option<AccuracySummary>,
    pub dataset_tier: Option<DatasetTier>,
    pub has_calibration: bool,
    pub current_drift_state: RetrainState,
    pub consecutive_drift_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// MAE over the current drift window, if any outcome was reported
    pub window_mae: Option<f64>,
    pub window_size: usize,
}

pub struct ModelLifecycle {
    predictor: Predictor,
    store: ModelStore,
    log: Arc<PredictionLogger>,
    detector: DriftDetector,
    orchestrator: RetrainOrchestrator,
    metrics: LifecycleMetrics,
    logger: StructuredLogger,
}

impl ModelLifecycle {
    pub fn new(
        store: ModelStore,
        log: Arc<PredictionLogger>,
        capabilities: MlCapabilities,
        detector: DriftDetector,
        orchestrator: RetrainOrchestrator,
    ) -> Self {
        Self {
            predictor: Predictor::new(store.clone(), log.clone(), capabilities),
            store,
            log,
            detector,
            orchestrator,
            metrics: LifecycleMetrics::new(),
            logger: StructuredLogger::new("shot-model"),
        }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn prediction_log(&self) -> &Arc<PredictionLogger> {
        &self.log
    }

    pub fn orchestrator(&self) -> &RetrainOrchestrator {
        &self.orchestrator
    }

    pub fn capabilities(&self) -> MlCapabilities {
        self.predictor.capabilities()
    }

    pub fn predict_point(&self, subject: &str, features: &FeatureMap) -> Result<PointPrediction, PredictError> {
        let start = Instant::now();
        let point = self.predictor.predict_point(subject, features)?;

        self.metrics
            .observe_prediction(subject, false, start.elapsed().as_secs_f64());
        self.logger.log_prediction(
            subject,
            &point.prediction_id.to_string(),
            point.predicted_value,
            None,
            point.model_version,
        );
        Ok(point)
    }

    pub fn predict_interval(
        &self,
        subject: &str,
        features: &FeatureMap,
        confidence: f64,
    ) -> Result<PredictionResult, PredictError> {
        let start = Instant::now();
        let result = self.predictor.predict_interval(subject, features, confidence)?;

        self.metrics
            .observe_prediction(subject, result.has_interval, start.elapsed().as_secs_f64());
        if let Some(reason) = &result.interval_unavailable {
            self.metrics.inc_interval_unavailable(reason.as_str());
        }
        self.logger.log_prediction(
            subject,
            &result.prediction_id.to_string(),
            result.predicted_value,
            result.interval(),
            result.model_version,
        );
        Ok(result)
    }

    /// Backfill the actual value, then check the subject for drift.
    ///
    /// Only completion errors are returned. Retraining, when triggered, runs
    /// in the background and this call does not wait for it.
    pub fn report_outcome(&self, outcome: &OutcomeObserved) -> Result<OutcomeReport, LogError> {
        let entry = self
            .log
            .complete_for(&outcome.subject, outcome.prediction_id, outcome.actual_value)?;

        self.metrics.inc_outcomes_recorded(&outcome.subject);
        self.logger.log_outcome(
            &outcome.subject,
            &outcome.prediction_id.to_string(),
            entry.predicted_value,
            outcome.actual_value,
        );

        let drift = match self.check_drift(&outcome.subject) {
            Ok(check) => check,
            Err(e) => {
                warn!(subject = %outcome.subject, error = %e, "Drift check skipped");
                DriftCheck::Skipped { reason: e.to_string() }
            }
        };

        Ok(OutcomeReport {
            prediction_id: entry.prediction_id,
            subject: entry.subject,
            predicted_value: entry.predicted_value,
            actual_value: outcome.actual_value,
            absolute_error: (outcome.actual_value - entry.predicted_value).abs(),
            model_version: entry.model_version,
            drift,
        })
    }

    fn check_drift(&self, subject: &str) -> Result<DriftCheck, PredictError> {
        let model = self.predictor.current_model(subject)?;
        let window = self.current_window(&model);
        let Some(baseline) = self.baseline_mae(&model) else {
            debug!(subject = %subject, version = %model.version, "No baseline MAE for serving model");
            return Ok(DriftCheck::NoBaseline);
        };

        let check = match self.detector.assess(&window, baseline) {
            DriftAssessment::Undetermined { samples, required } => DriftCheck::Undetermined { samples, required },
            DriftAssessment::NoBaseline => DriftCheck::NoBaseline,
            DriftAssessment::Stable { window_mae, limit } => DriftCheck::Stable { window_mae, limit },
            DriftAssessment::Drifted(event) => {
                let disposition = self.orchestrator.on_drift_event(&event);
                DriftCheck::Drifted { event, disposition }
            }
        };
        Ok(check)
    }

    fn current_window(&self, model: &LoadedModel) -> DriftWindow {
        let query = self.detector.window_query(model.version);
        DriftWindow::new(&model.subject, model.version, self.log.window(&model.subject, &query))
    }

    /// Metadata MAE, falling back to the last retrain's baseline for legacy models
    fn baseline_mae(&self, model: &LoadedModel) -> Option<f64> {
        model
            .metadata
            .as_ref()
            .map(|m| m.accuracy.mae)
            .or_else(|| self.orchestrator.state(&model.subject).and_then(|s| s.baseline_mae))
    }

    pub fn health(&self, subject: &str) -> Result<ModelHealthSnapshot, PredictError> {
        let model = self.predictor.current_model(subject)?;
        let window = self.current_window(&model);
        let state = self.orchestrator.state(subject);
        let metadata = model.metadata.as_ref();

        Ok(ModelHealthSnapshot {
            subject: subject.to_string(),
            model_version: model.version,
            trained_at: metadata.map(|m| m.trained_at),
            sample_count: metadata.map(|m| m.sample_count),
            accuracy: metadata.map(|m| m.accuracy.clone()),
            dataset_tier: metadata.map(|m| m.dataset_tier),
            has_calibration: model.has_calibration(),
            current_drift_state: state.as_ref().map_or(RetrainState::Monitoring, |s| s.state),
            consecutive_drift_count: state.as_ref().map_or(0, |s| s.consecutive_drift_count),
            cooldown_until: state.as_ref().and_then(|s| s.cooldown_until),
            window_mae: window.mae(),
            window_size: window.len(),
        })
    }

    pub fn versions(&self, subject: &str) -> Result<Vec<ModelVersion>, StoreError> {
        self.store.versions(subject)
    }

    /// Train and publish a model for `subject` now
    pub async fn train_now(&self, subject: &str) -> Result<ModelMetadata, RetrainError> {
        self.orchestrator.train_now(subject).await
    }

    /// Consume outcome notifications until the sender side closes
    pub fn spawn_outcome_consumer(self: Arc<Self>, mut outcomes: mpsc::Receiver<OutcomeObserved>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(outcome) = outcomes.recv().await {
                // Journal append and model loads touch the filesystem
                let lifecycle = self.clone();
                let handled = tokio::task::spawn_blocking(move || {
                    let result = lifecycle.report_outcome(&outcome);
                    (outcome, result)
                })
                .await;
                let (outcome, result) = match handled {
                    Ok(handled) => handled,
                    Err(e) => {
                        warn!(error = %e, "Outcome task failed");
                        continue;
                    }
                };

                match result {
                    Ok(report) => debug!(
                        subject = %report.subject,
                        prediction_id = %report.prediction_id,
                        "Outcome consumed"
                    ),
                    Err(LogError::AlreadyCompleted { prediction_id }) => {
                        info!(prediction_id = %prediction_id, "Duplicate outcome ignored")
                    }
                    Err(e) => warn!(
                        subject = %outcome.subject,
                        prediction_id = %outcome.prediction_id,
                        error = %e,
                        "Failed to record outcome"
                    ),
                }
            }
            debug!("Outcome channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::DriftConfig;
    use crate::retrain::{OrchestratorConfig, StateStore};
    use crate::test_support::{features, synthetic_dataset, train};
    use crate::training::{InMemoryDataSource, ModelTrainer, TrainerConfig};
    use tempfile::TempDir;

    fn lifecycle(dir: &TempDir) -> ModelLifecycle {
        let store = ModelStore::open(dir.path().join("models")).unwrap();
        let source = InMemoryDataSource::new();
        source.insert(synthetic_dataset("Driver", 120, 21));
        let trainer = Arc::new(ModelTrainer::new(TrainerConfig::default(), MlCapabilities::full()));
        let orchestrator = RetrainOrchestrator::new(
            OrchestratorConfig::default(),
            trainer,
            store.clone(),
            Arc::new(source),
            StateStore::in_memory(),
        )
        .unwrap();
        ModelLifecycle::new(
            store,
            Arc::new(PredictionLogger::in_memory()),
            MlCapabilities::full(),
            DriftDetector::new(DriftConfig::default()),
            orchestrator,
        )
    }

    fn publish(lifecycle: &ModelLifecycle, n: usize) -> ModelMetadata {
        let trained = train("Driver", n);
        lifecycle.store().save(&trained.artifact, &trained.metadata).unwrap();
        trained.metadata
    }

    fn outcome(subject: &str, prediction_id: PredictionId, actual_value: f64) -> OutcomeObserved {
        OutcomeObserved {
            subject: subject.to_string(),
            prediction_id,
            actual_value,
        }
    }

    #[tokio::test]
    async fn test_outcome_completes_prediction() {
        let dir = TempDir::new().unwrap();
        let lifecycle = lifecycle(&dir);
        publish(&lifecycle, 100);

        let point = lifecycle.predict_point("Driver", &features(100.0, 12.0)).unwrap();
        let report = lifecycle
            .report_outcome(&outcome("Driver", point.prediction_id, point.predicted_value + 3.0))
            .unwrap();

        assert!((report.absolute_error - 3.0).abs() < 1e-9);
        assert_eq!(report.drift, DriftCheck::Undetermined { samples: 1, required: 5 });
        assert!(lifecycle.prediction_log().get(point.prediction_id).unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_duplicate_outcome_rejected() {
        let dir = TempDir::new().unwrap();
        let lifecycle = lifecycle(&dir);
        publish(&lifecycle, 100);

        let point = lifecycle.predict_point("Driver", &features(95.0, 14.0)).unwrap();
        lifecycle
            .report_outcome(&outcome("Driver", point.prediction_id, 200.0))
            .unwrap();
        let err = lifecycle
            .report_outcome(&outcome("Driver", point.prediction_id, 250.0))
            .unwrap_err();
        assert!(matches!(err, LogError::AlreadyCompleted { .. }));
        assert_eq!(
            lifecycle.prediction_log().get(point.prediction_id).unwrap().actual_value,
            Some(200.0)
        );
    }

    #[tokio::test]
    async fn test_wrong_subject_rejected() {
        let dir = TempDir::new().unwrap();
        let lifecycle = lifecycle(&dir);
        publish(&lifecycle, 100);

        let point = lifecycle.predict_point("Driver", &features(95.0, 14.0)).unwrap();
        let err = lifecycle
            .report_outcome(&outcome("Putter", point.prediction_id, 200.0))
            .unwrap_err();
        assert!(matches!(err, LogError::SubjectMismatch { .. }));
    }

    #[tokio::test]
    async fn test_large_errors_reach_orchestrator() {
        let dir = TempDir::new().unwrap();
        let lifecycle = lifecycle(&dir);
        publish(&lifecycle, 100);

        let mut checks = Vec::new();
        for i in 0..6 {
            let point = lifecycle
                .predict_point("Driver", &features(90.0 + i as f64, 12.0))
                .unwrap();
            let report = lifecycle
                .report_outcome(&outcome("Driver", point.prediction_id, point.predicted_value + 60.0))
                .unwrap();
            checks.push(report.drift);
        }

        assert!(matches!(checks[3], DriftCheck::Undetermined { .. }));
        assert!(matches!(
            checks[4],
            DriftCheck::Drifted {
                disposition: DriftDisposition::Accumulating { count: 1, .. },
                ..
            }
        ));
        assert!(matches!(
            checks[5],
            DriftCheck::Drifted {
                disposition: DriftDisposition::Accumulating { count: 2, .. },
                ..
            }
        ));
        assert_eq!(lifecycle.health("Driver").unwrap().consecutive_drift_count, 2);
    }

    #[tokio::test]
    async fn test_health_snapshot() {
        let dir = TempDir::new().unwrap();
        let lifecycle = lifecycle(&dir);
        assert!(matches!(
            lifecycle.health("Driver"),
            Err(PredictError::ModelNotFound { .. })
        ));

        let metadata = publish(&lifecycle, 300);
        let health = lifecycle.health("Driver").unwrap();
        assert_eq!(health.model_version, metadata.version);
        assert_eq!(health.sample_count, Some(300));
        assert_eq!(health.dataset_tier, Some(DatasetTier::Small));
        assert!(!health.has_calibration);
        assert_eq!(health.current_drift_state, RetrainState::Monitoring);
        assert_eq!(health.window_size, 0);
        assert_eq!(health.window_mae, None);
    }

    #[tokio::test]
    async fn test_outcome_consumer_ignores_duplicates() {
        let dir = TempDir::new().unwrap();
        let lifecycle = Arc::new(lifecycle(&dir));
        publish(&lifecycle, 100);

        let point = lifecycle.predict_point("Driver", &features(100.0, 12.0)).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let handle = lifecycle.clone().spawn_outcome_consumer(rx);

        tx.send(outcome("Driver", point.prediction_id, 215.0)).await.unwrap();
        tx.send(outcome("Driver", point.prediction_id, 999.0)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let entry = lifecycle.prediction_log().get(point.prediction_id).unwrap();
        assert_eq!(entry.actual_value, Some(215.0));
    }
}
