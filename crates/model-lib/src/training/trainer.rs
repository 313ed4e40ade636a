//! Model trainer
//!
//! Fits the base regressor and, data and capability permitting, a CV+
//! calibrator on a disjoint calibration partition.

use super::booster::{mean_absolute_error, root_mean_squared_error, GradientBoostedTrees};
use super::conformal::{ConformalCalibrator, DEFAULT_FOLDS};
use super::policy::Hyperparameters;
use crate::capability::MlCapabilities;
use crate::error::TrainingError;
use crate::models::{align_features, Dataset, DatasetTier, ModelVersion};
use crate::store::{ModelArtifact, ModelMetadata};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rows required to fit any model at all
pub const MIN_TRAINING_ROWS: usize = 5;

/// Rows required before interval calibration is attempted
pub const MIN_CALIBRATION_ROWS: usize = 1000;

/// Default confidence level recorded for calibrated models
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Trainer configuration
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Absolute floor of usable rows
    pub min_training_rows: usize,
    /// Rows required before calibration is attempted
    pub min_calibration_rows: usize,
    /// Share of rows reserved for calibration
    pub calibration_fraction: f64,
    /// Share of rows held out for evaluation when not calibrating
    pub holdout_fraction: f64,
    /// Cross-validation folds for CV+
    pub cv_folds: usize,
    /// Confidence level recorded in metadata
    pub confidence_level: f64,
    /// Seed for splits and subsampling
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            min_training_rows: MIN_TRAINING_ROWS,
            min_calibration_rows: MIN_CALIBRATION_ROWS,
            calibration_fraction: 0.3,
            holdout_fraction: 0.2,
            cv_folds: DEFAULT_FOLDS,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            seed: 42,
        }
    }
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    /// Produce a calibrated interval predictor when possible
    pub calibrate: bool,
    /// Latest published version for the subject, if any
    pub previous_version: Option<ModelVersion>,
}

impl TrainOptions {
    pub fn calibrated(previous_version: Option<ModelVersion>) -> Self {
        Self {
            calibrate: true,
            previous_version,
        }
    }
}

/// Why a model was trained without interval calibration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CalibrationSkipped {
    NotRequested,
    CapabilityUnavailable,
    InsufficientRows { rows: usize, required: usize },
}

impl fmt::Display for CalibrationSkipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationSkipped::NotRequested => write!(f, "calibration was not requested"),
            CalibrationSkipped::CapabilityUnavailable => {
                write!(f, "interval calibration is not available in this deployment")
            }
            CalibrationSkipped::InsufficientRows { rows, required } => write!(
                f,
                "model was trained on {} samples, interval calibration needs at least {}",
                rows, required
            ),
        }
    }
}

/// Calibration outcome recorded in model metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationStatus {
    Calibrated { rows: usize, folds: usize },
    Skipped(CalibrationSkipped),
}

impl CalibrationStatus {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, CalibrationStatus::Calibrated { .. })
    }
}

/// Held-out accuracy of the base regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracySummary {
    pub mae: f64,
    pub rmse: f64,
    /// Number of held-out rows the figures were computed on
    pub evaluated_on: usize,
}

/// Disjoint row partitions used by one training run (indices into usable rows)
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub train: Vec<usize>,
    pub held_out: Vec<usize>,
}

impl Partition {
    /// Shuffle `0..n` and reserve `fraction` of it (at least one row on
    /// each side) as the held-out side.
    pub fn shuffled(n: usize, fraction: f64, rng: &mut StdRng) -> Self {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        let held_out_len = ((n as f64 * fraction).round() as usize).clamp(1, n.saturating_sub(1).max(1));
        let mut held_out = order[..held_out_len].to_vec();
        let mut train = order[held_out_len..].to_vec();
        held_out.sort_unstable();
        train.sort_unstable();
        Self { train, held_out }
    }

    pub fn is_disjoint(&self) -> bool {
        // Both sides are sorted
        let (mut i, mut j) = (0, 0);
        while i < self.train.len() && j < self.held_out.len() {
            match self.train[i].cmp(&self.held_out[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => return false,
            }
        }
        true
    }
}

/// Output of one training run
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub artifact: ModelArtifact,
    pub metadata: ModelMetadata,
    pub partition: Partition,
}

/// Fits models for a subject
pub struct ModelTrainer {
    config: TrainerConfig,
    capabilities: MlCapabilities,
}

impl ModelTrainer {
    pub fn new(config: TrainerConfig, capabilities: MlCapabilities) -> Self {
        Self {
            config,
            capabilities,
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn capabilities(&self) -> MlCapabilities {
        self.capabilities
    }

    /// Train a model on the subject's dataset
    pub fn train(&self, dataset: &Dataset, options: &TrainOptions) -> Result<TrainedModel, TrainingError> {
        let start = Instant::now();
        let subject = dataset.subject.clone();

        let rows = dataset.usable_rows();
        let dropped = dataset.len() - rows.len();
        if dropped > 0 {
            warn!(subject = %subject, dropped, "Dropped rows with non-finite values");
        }
        if rows.len() < self.config.min_training_rows {
            return Err(TrainingError::InsufficientData {
                subject,
                required: self.config.min_training_rows,
                actual: rows.len(),
            });
        }

        let feature_names = dataset.feature_names();
        if feature_names.is_empty() {
            return Err(TrainingError::NoFeatures { subject });
        }

        let x: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| align_features(&r.features, &feature_names).0)
            .collect();
        let y: Vec<f64> = rows.iter().map(|r| r.outcome).collect();
        let n = y.len();

        let tier = DatasetTier::for_sample_count(n);
        let params = Hyperparameters::for_sample_count(n);
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        debug!(subject = %subject, rows = n, tier = %tier, "Selected hyperparameters");

        let plan = self.calibration_plan(n, options.calibrate);
        let fraction = match plan {
            Ok(()) => self.config.calibration_fraction,
            Err(_) => self.config.holdout_fraction,
        };
        let partition = Partition::shuffled(n, fraction, &mut rng);

        let (train_x, train_y) = select(&x, &y, &partition.train);
        let (eval_x, eval_y) = select(&x, &y, &partition.held_out);

        let booster = GradientBoostedTrees::fit(&train_x, &train_y, &params, &mut rng);

        let eval_predictions: Vec<f64> = eval_x.iter().map(|r| booster.predict(r)).collect();
        let accuracy = AccuracySummary {
            mae: mean_absolute_error(&eval_predictions, &eval_y),
            rmse: root_mean_squared_error(&eval_predictions, &eval_y),
            evaluated_on: eval_y.len(),
        };

        let (calibrator, calibration) = match plan {
            Ok(()) => match ConformalCalibrator::fit(&eval_x, &eval_y, &params, self.config.cv_folds, &mut rng) {
                Some(c) => {
                    let status = CalibrationStatus::Calibrated {
                        rows: c.calibration_size(),
                        folds: c.folds(),
                    };
                    (Some(c), status)
                }
                None => (
                    None,
                    CalibrationStatus::Skipped(CalibrationSkipped::InsufficientRows {
                        rows: eval_y.len(),
                        required: self.config.cv_folds,
                    }),
                ),
            },
            Err(reason) => (None, CalibrationStatus::Skipped(reason)),
        };

        let trained_at = Utc::now();
        let version = ModelVersion::from_trained_at(trained_at, options.previous_version);

        let artifact = ModelArtifact {
            feature_names: feature_names.clone(),
            booster,
            calibrator,
        };
        let metadata = ModelMetadata {
            subject: subject.clone(),
            version,
            trained_at,
            sample_count: n,
            training_rows: partition.train.len(),
            evaluation_rows: partition.held_out.len(),
            feature_names,
            accuracy,
            confidence_level: self.config.confidence_level,
            dataset_tier: tier,
            hyperparameters: params,
            calibration,
        };

        info!(
            subject = %subject,
            version = %version,
            rows = n,
            tier = %tier,
            mae = metadata.accuracy.mae,
            calibrated = metadata.calibration.is_calibrated(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model trained"
        );

        Ok(TrainedModel {
            artifact,
            metadata,
            partition,
        })
    }

    fn calibration_plan(&self, rows: usize, requested: bool) -> Result<(), CalibrationSkipped> {
        if !requested {
            Err(CalibrationSkipped::NotRequested)
        } else if !self.capabilities.intervals_available() {
            Err(CalibrationSkipped::CapabilityUnavailable)
        } else if rows < self.config.min_calibration_rows {
            Err(CalibrationSkipped::InsufficientRows {
                rows,
                required: self.config.min_calibration_rows,
            })
        } else {
            Ok(())
        }
    }
}

fn select(x: &[Vec<f64>], y: &[f64], indices: &[usize]) -> (Vec<Vec<f64>>, Vec<f64>) {
    (
        indices.iter().map(|&i| x[i].clone()).collect(),
        indices.iter().map(|&i| y[i]).collect(),
    )
}
