//! Predictive drift detection
//!
//! Compares the mean absolute error of recent completed predictions against
//! the baseline MAE recorded when the serving model was trained.

mod detector;
mod window;

pub use detector::{
    DriftAssessment, DriftConfig, DriftDetector, DriftEvent, DriftSeverity, DriftThreshold,
    DEFAULT_MIN_SAMPLES, DEFAULT_WINDOW_ENTRIES,
};
pub use window::DriftWindow;
