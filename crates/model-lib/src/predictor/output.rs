//! Prediction results and interval post-processing

use crate::models::{ModelVersion, PredictionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an interval request was answered with a point estimate only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IntervalUnavailable {
    /// Interval support is not built in or switched off
    CapabilityDisabled,
    /// The serving model has no calibrator
    NotCalibrated {
        sample_count: Option<usize>,
        required: usize,
    },
}

impl IntervalUnavailable {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnavailable::CapabilityDisabled => "capability_disabled",
            IntervalUnavailable::NotCalibrated { .. } => "not_calibrated",
        }
    }
}

impl fmt::Display for IntervalUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalUnavailable::CapabilityDisabled => {
                write!(f, "confidence intervals are not available in this deployment")
            }
            IntervalUnavailable::NotCalibrated {
                sample_count: Some(n),
                required,
            } => write!(
                f,
                "model was trained on {} samples; confidence intervals need at least {}",
                n, required
            ),
            IntervalUnavailable::NotCalibrated {
                sample_count: None,
                required,
            } => write!(
                f,
                "model has no interval calibration; confidence intervals need at least {} samples",
                required
            ),
        }
    }
}

/// Point estimate for one feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPrediction {
    pub prediction_id: PredictionId,
    pub subject: String,
    pub predicted_value: f64,
    pub model_version: ModelVersion,
    /// Expected features the caller did not supply
    pub missing_features: Vec<String>,
}

/// Point estimate with an optional calibrated interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prediction_id: PredictionId,
    pub subject: String,
    pub predicted_value: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub confidence_level: Option<f64>,
    pub has_interval: bool,
    pub interval_unavailable: Option<IntervalUnavailable>,
    pub model_version: ModelVersion,
    pub missing_features: Vec<String>,
}

impl PredictionResult {
    pub fn point_only(point: PointPrediction, reason: IntervalUnavailable) -> Self {
        Self {
            prediction_id: point.prediction_id,
            subject: point.subject,
            predicted_value: point.predicted_value,
            lower_bound: None,
            upper_bound: None,
            confidence_level: None,
            has_interval: false,
            interval_unavailable: Some(reason),
            model_version: point.model_version,
            missing_features: point.missing_features,
        }
    }

    pub fn interval(&self) -> Option<(f64, f64)> {
        self.lower_bound.zip(self.upper_bound)
    }
}

/// Widen `(lower, upper)` so it always contains `point`
pub fn bracket(point: f64, lower: f64, upper: f64) -> (f64, f64) {
    (lower.min(point), upper.max(point))
}

/// Confidence must lie strictly between 0 and 1
pub fn is_valid_confidence(confidence: f64) -> bool {
    confidence.is_finite() && confidence > 0.0 && confidence < 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_widens_to_contain_point() {
        assert_eq!(bracket(10.0, 8.0, 12.0), (8.0, 12.0));
        assert_eq!(bracket(10.0, 11.0, 12.0), (10.0, 12.0));
        assert_eq!(bracket(10.0, 8.0, 9.5), (8.0, 10.0));
    }

    #[test]
    fn test_confidence_bounds() {
        assert!(is_valid_confidence(0.95));
        assert!(!is_valid_confidence(0.0));
        assert!(!is_valid_confidence(1.0));
        assert!(!is_valid_confidence(f64::NAN));
    }

    #[test]
    fn test_unavailable_message_names_sample_count() {
        let reason = IntervalUnavailable::NotCalibrated {
            sample_count: Some(300),
            required: 1000,
        };
        assert!(reason.to_string().contains("300 samples"));
        assert_eq!(reason.as_str(), "not_calibrated");
    }
}
