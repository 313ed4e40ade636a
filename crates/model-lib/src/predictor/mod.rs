//! Prediction serving
//!
//! Loads the latest published model per subject, aligns caller features to
//! the model's ordering and records every served prediction in the log.

mod output;

pub use output::{
    bracket, is_valid_confidence, IntervalUnavailable, PointPrediction, PredictionResult,
};

use crate::capability::MlCapabilities;
use crate::error::{PredictError, StoreError};
use crate::models::{align_features, FeatureMap};
use crate::prediction_log::{PredictionLogEntry, PredictionLogger};
use crate::store::{LoadedModel, ModelStore};
use crate::training::{CalibrationSkipped, CalibrationStatus, MIN_CALIBRATION_ROWS};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

pub struct Predictor {
    store: ModelStore,
    log: Arc<PredictionLogger>,
    capabilities: MlCapabilities,
    cache: DashMap<String, Arc<LoadedModel>>,
}

impl Predictor {
    pub fn new(store: ModelStore, log: Arc<PredictionLogger>, capabilities: MlCapabilities) -> Self {
        Self {
            store,
            log,
            capabilities,
            cache: DashMap::new(),
        }
    }

    pub fn capabilities(&self) -> MlCapabilities {
        self.capabilities
    }

    /// Latest published model, reloaded whenever a newer version appears
    pub fn current_model(&self, subject: &str) -> Result<Arc<LoadedModel>, PredictError> {
        let latest = self.store.latest(subject)?.ok_or_else(|| PredictError::ModelNotFound {
            subject: subject.to_string(),
        })?;

        if let Some(cached) = self.cache.get(subject) {
            if cached.version == latest {
                return Ok(cached.clone());
            }
        }

        let loaded = match self.store.load(subject, latest) {
            Ok(model) => Arc::new(model),
            // Pruned between listing and loading; fall back to whatever is newest now
            Err(StoreError::ModelNotFound { .. }) => Arc::new(self.store.load_latest(subject)?),
            Err(e) => return Err(e.into()),
        };
        debug!(subject = %subject, version = %loaded.version, "Serving model loaded");
        self.cache.insert(subject.to_string(), loaded.clone());
        Ok(loaded)
    }

    /// Point estimate only
    pub fn predict_point(&self, subject: &str, features: &FeatureMap) -> Result<PointPrediction, PredictError> {
        let model = self.current_model(subject)?;
        let (row, missing_features) = self.align(&model, features);
        let predicted_value = model.artifact.predict(&row);

        let entry = PredictionLogEntry::new(subject, features.clone(), predicted_value, model.version);
        let prediction_id = self.log.record(entry)?;

        Ok(PointPrediction {
            prediction_id,
            subject: subject.to_string(),
            predicted_value,
            model_version: model.version,
            missing_features,
        })
    }

    /// Point estimate plus a calibrated interval when one can be produced.
    ///
    /// A missing calibrator is not an error: the result carries
    /// `has_interval = false` and the reason.
    pub fn predict_interval(
        &self,
        subject: &str,
        features: &FeatureMap,
        confidence: f64,
    ) -> Result<PredictionResult, PredictError> {
        if !is_valid_confidence(confidence) {
            return Err(PredictError::InvalidConfidence(confidence));
        }

        let model = self.current_model(subject)?;
        let (row, missing_features) = self.align(&model, features);
        let predicted_value = model.artifact.predict(&row);

        let calibrator = match (&model.artifact.calibrator, self.capabilities.intervals_available()) {
            (_, false) => Err(IntervalUnavailable::CapabilityDisabled),
            (None, true) => Err(not_calibrated(&model)),
            (Some(calibrator), true) => Ok(calibrator),
        };

        let entry = PredictionLogEntry::new(subject, features.clone(), predicted_value, model.version);
        let calibrator = match calibrator {
            Ok(calibrator) => calibrator,
            Err(reason) => {
                debug!(subject = %subject, reason = %reason, "Serving point estimate only");
                let prediction_id = self.log.record(entry)?;
                let point = PointPrediction {
                    prediction_id,
                    subject: subject.to_string(),
                    predicted_value,
                    model_version: model.version,
                    missing_features,
                };
                return Ok(PredictionResult::point_only(point, reason));
            }
        };

        let (lo, hi) = calibrator.interval(&row, confidence);
        let (lo, hi) = bracket(predicted_value, lo, hi);
        let prediction_id = self.log.record(entry.with_interval(lo, hi, confidence))?;

        Ok(PredictionResult {
            prediction_id,
            subject: subject.to_string(),
            predicted_value,
            lower_bound: Some(lo),
            upper_bound: Some(hi),
            confidence_level: Some(confidence),
            has_interval: true,
            interval_unavailable: None,
            model_version: model.version,
            missing_features,
        })
    }

    fn align(&self, model: &LoadedModel, features: &FeatureMap) -> (Vec<f64>, Vec<String>) {
        let (row, missing) = align_features(features, &model.feature_names);
        let unknown = features
            .keys()
            .filter(|name| !model.feature_names.contains(name))
            .count();
        if unknown > 0 || !missing.is_empty() {
            debug!(
                subject = %model.subject,
                unknown,
                missing = missing.len(),
                "Feature set differs from model"
            );
        }
        (row, missing)
    }
}

fn not_calibrated(model: &LoadedModel) -> IntervalUnavailable {
    match model.metadata.as_ref().map(|m| (&m.calibration, m.sample_count)) {
        Some((CalibrationStatus::Skipped(CalibrationSkipped::InsufficientRows { required, .. }), n)) => {
            IntervalUnavailable::NotCalibrated {
                sample_count: Some(n),
                required: *required,
            }
        }
        Some((_, n)) => IntervalUnavailable::NotCalibrated {
            sample_count: Some(n),
            required: MIN_CALIBRATION_ROWS,
        },
        None => IntervalUnavailable::NotCalibrated {
            sample_count: None,
            required: MIN_CALIBRATION_ROWS,
        },
    }
}
