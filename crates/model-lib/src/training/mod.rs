//! Model training: hyperparameter policy, boosting, conformal calibration

mod booster;
mod conformal;
mod policy;
mod source;
mod trainer;

pub use booster::{mean_absolute_error, root_mean_squared_error, GradientBoostedTrees};
pub use conformal::{ConformalCalibrator, DEFAULT_FOLDS};
pub use policy::Hyperparameters;
pub use source::{InMemoryDataSource, JsonlDataSource, TrainingDataSource};
pub use trainer::{
    AccuracySummary, CalibrationSkipped, CalibrationStatus, ModelTrainer, Partition,
    TrainOptions, TrainedModel, TrainerConfig, DEFAULT_CONFIDENCE_LEVEL, MIN_CALIBRATION_ROWS,
    MIN_TRAINING_ROWS,
};
