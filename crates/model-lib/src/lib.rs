//! Shot outcome model lifecycle
//!
//! This crate provides the core functionality for:
//! - Training per-subject regression models with conformal intervals
//! - Versioned model storage
//! - Prediction serving and logging
//! - Predictive drift detection and drift-triggered retraining
//! - Health checks and observability

pub mod capability;
pub mod drift;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod prediction_log;
pub mod predictor;
pub mod retrain;
pub mod store;
pub mod training;

#[cfg(test)]
mod test_support;

pub use capability::MlCapabilities;
pub use error::{LogError, PredictError, RetrainError, StoreError, TrainingError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{DriftCheck, ModelHealthSnapshot, ModelLifecycle, OutcomeObserved, OutcomeReport};
pub use models::*;
pub use observability::{LifecycleMetrics, StructuredLogger};
pub use predictor::{IntervalUnavailable, PointPrediction, PredictionResult, Predictor};
pub use store::{LoadedModel, ModelArtifact, ModelMetadata, ModelStore};
