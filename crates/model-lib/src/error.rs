//! Error types for the model lifecycle
//!
//! Data and calibration shortfalls are not errors: a model trained without
//! calibration still serves point estimates and reports the reason through
//! [`crate::predictor::IntervalUnavailable`].

use crate::models::{ModelVersion, PredictionId};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of a single training attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("insufficient data for subject '{subject}': {actual} usable rows, need at least {required}")]
    InsufficientData {
        subject: String,
        required: usize,
        actual: usize,
    },
    #[error("dataset for subject '{subject}' has no features")]
    NoFeatures { subject: String },
}

/// Model store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no model trained yet for subject '{subject}'{}", .version.map(|v| format!(" (version {})", v)).unwrap_or_default())]
    ModelNotFound {
        subject: String,
        version: Option<ModelVersion>,
    },
    #[error("model version {version} already exists for subject '{subject}'")]
    VersionExists {
        subject: String,
        version: ModelVersion,
    },
    #[error("corrupt model artifact at {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::ModelNotFound { .. })
    }
}

/// Prediction log failures
#[derive(Error, Debug)]
pub enum LogError {
    #[error("prediction {prediction_id} already has an actual value recorded")]
    AlreadyCompleted { prediction_id: PredictionId },
    #[error("unknown prediction {prediction_id}")]
    UnknownPrediction { prediction_id: PredictionId },
    #[error("prediction {prediction_id} belongs to subject '{actual}', not '{expected}'")]
    SubjectMismatch {
        prediction_id: PredictionId,
        expected: String,
        actual: String,
    },
    #[error("actual value for prediction {prediction_id} is not finite")]
    InvalidActual { prediction_id: PredictionId },
    #[error("prediction {prediction_id} is already recorded")]
    DuplicatePrediction { prediction_id: PredictionId },
    #[error("failed to persist prediction log at {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Prediction serving failures
#[derive(Error, Debug)]
pub enum PredictError {
    #[error("no model trained yet for subject '{subject}': not enough data yet")]
    ModelNotFound { subject: String },
    #[error("confidence level {0} must be between 0 and 1 (exclusive)")]
    InvalidConfidence(f64),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Log(#[from] LogError),
}

impl From<StoreError> for PredictError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ModelNotFound { subject, .. } => PredictError::ModelNotFound { subject },
            other => PredictError::Store(other),
        }
    }
}

/// Failures of a retraining cycle; these never reach the outcome reporter
#[derive(Error, Debug)]
pub enum RetrainError {
    #[error("training data source failed: {0:#}")]
    Source(anyhow::Error),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("training timed out after {0:?}")]
    Timeout(Duration),
    #[error("training task aborted: {0}")]
    Join(String),
    #[error("a retraining cycle is already running for subject '{subject}'")]
    InProgress { subject: String },
}

impl RetrainError {
    /// Short name of the step that failed, for logs and metrics
    pub fn operation(&self) -> &'static str {
        match self {
            RetrainError::Source(_) => "fetch",
            RetrainError::Training(_) | RetrainError::Timeout(_) | RetrainError::Join(_) => "train",
            RetrainError::Store(_) => "publish",
            RetrainError::InProgress { .. } => "schedule",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_predict_not_found() {
        let err: PredictError = StoreError::ModelNotFound {
            subject: "Driver".to_string(),
            version: None,
        }
        .into();
        assert!(matches!(err, PredictError::ModelNotFound { ref subject } if subject == "Driver"));
        assert!(err.to_string().contains("not enough data"));
    }

    #[test]
    fn test_not_found_message_includes_version() {
        let err = StoreError::ModelNotFound {
            subject: "Driver".to_string(),
            version: Some(ModelVersion::new(7)),
        };
        assert!(err.to_string().contains("v7"));
        assert!(err.is_not_found());
    }
}
