//! Window MAE versus baseline MAE

use super::window::DriftWindow;
use crate::models::ModelVersion;
use crate::prediction_log::WindowQuery;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of most recent completed predictions in a window
pub const DEFAULT_WINDOW_ENTRIES: usize = 20;

/// Minimum completed predictions before drift can be judged
pub const DEFAULT_MIN_SAMPLES: usize = 5;

/// Default age bound of a window
const DEFAULT_WINDOW_DAYS: i64 = 30;

/// How far the window MAE may exceed the baseline before it counts as drift
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DriftThreshold {
    /// Drift when window MAE > baseline * (1 + r)
    Relative(f64),
    /// Drift when window MAE > baseline + d
    Absolute(f64),
}

impl DriftThreshold {
    /// Largest window MAE still considered stable, `None` if it cannot be
    /// derived from this baseline
    pub fn limit(&self, baseline: f64) -> Option<f64> {
        if !baseline.is_finite() {
            return None;
        }
        match *self {
            DriftThreshold::Relative(r) if baseline > f64::EPSILON => Some(baseline * (1.0 + r)),
            DriftThreshold::Relative(_) => None,
            DriftThreshold::Absolute(d) => Some(baseline + d),
        }
    }
}

impl Default for DriftThreshold {
    fn default() -> Self {
        DriftThreshold::Relative(0.5)
    }
}

impl fmt::Display for DriftThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftThreshold::Relative(r) => write!(f, "+{:.0}%", r * 100.0),
            DriftThreshold::Absolute(d) => write!(f, "+{}", d),
        }
    }
}

/// Detector configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DriftConfig {
    pub max_entries: usize,
    pub max_age: Option<Duration>,
    pub min_samples: usize,
    pub threshold: DriftThreshold,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_WINDOW_ENTRIES,
            max_age: Some(Duration::days(DEFAULT_WINDOW_DAYS)),
            min_samples: DEFAULT_MIN_SAMPLES,
            threshold: DriftThreshold::default(),
        }
    }
}

/// Drift severity from the window/baseline MAE ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    Warning,
    High,
    Critical,
}

impl DriftSeverity {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 3.0 {
            DriftSeverity::Critical
        } else if ratio >= 2.0 {
            DriftSeverity::High
        } else {
            DriftSeverity::Warning
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DriftSeverity::Warning => "warning",
            DriftSeverity::High => "high",
            DriftSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confirmed drift for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEvent {
    pub subject: String,
    pub detected_at: DateTime<Utc>,
    pub window_mae: f64,
    pub baseline_mae: f64,
    pub window_size: usize,
    /// Window MAE limit that was exceeded
    pub threshold: f64,
    pub severity: DriftSeverity,
    pub model_version: ModelVersion,
}

impl DriftEvent {
    pub fn ratio(&self) -> f64 {
        if self.baseline_mae > f64::EPSILON {
            self.window_mae / self.baseline_mae
        } else {
            f64::INFINITY
        }
    }
}

/// Outcome of one assessment
#[derive(Debug, Clone, PartialEq)]
pub enum DriftAssessment {
    /// Too few completed predictions to judge
    Undetermined { samples: usize, required: usize },
    /// Threshold cannot be derived from the baseline
    NoBaseline,
    Stable { window_mae: f64, limit: f64 },
    Drifted(DriftEvent),
}

impl DriftAssessment {
    pub fn into_event(self) -> Option<DriftEvent> {
        match self {
            DriftAssessment::Drifted(event) => Some(event),
            _ => None,
        }
    }
}

/// Stateless drift detector
#[derive(Debug, Clone, Default)]
pub struct DriftDetector {
    config: DriftConfig,
}

impl DriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Prediction log query matching this detector's window
    pub fn window_query(&self, model_version: ModelVersion) -> WindowQuery {
        WindowQuery {
            max_entries: Some(self.config.max_entries),
            max_age: self.config.max_age,
            model_version: Some(model_version),
        }
    }

    pub fn assess(&self, window: &DriftWindow, baseline_mae: f64) -> DriftAssessment {
        let samples = window.len();
        let required = self.config.min_samples.max(1);
        let Some(window_mae) = window.mae().filter(|_| samples >= required) else {
            return DriftAssessment::Undetermined { samples, required };
        };

        let Some(limit) = self.config.threshold.limit(baseline_mae) else {
            return DriftAssessment::NoBaseline;
        };

        if window_mae <= limit {
            return DriftAssessment::Stable { window_mae, limit };
        }

        let ratio = if baseline_mae > f64::EPSILON {
            window_mae / baseline_mae
        } else {
            f64::INFINITY
        };

        DriftAssessment::Drifted(DriftEvent {
            subject: window.subject().to_string(),
            detected_at: Utc::now(),
            window_mae,
            baseline_mae,
            window_size: samples,
            threshold: limit,
            severity: DriftSeverity::from_ratio(ratio),
            model_version: window.model_version(),
        })
    }

    pub fn detect(&self, window: &DriftWindow, baseline_mae: f64) -> Option<DriftEvent> {
        self.assess(window, baseline_mae).into_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction_log::{PredictionLogEntry, PredictionLogger};
    use crate::test_support::features;

    const VERSION: ModelVersion = ModelVersion::new(1_700_000_000_000);
    const BASELINE: f64 = 2.0;

    /// Record and complete one prediction per error, oldest first
    fn logged_window(detector: &DriftDetector, errors: &[f64]) -> DriftWindow {
        let log = PredictionLogger::in_memory();
        let start = Utc::now() - Duration::hours(1);
        for (i, error) in errors.iter().enumerate() {
            let entry = PredictionLogEntry::new("Driver", features(100.0, 12.0), 240.0, VERSION)
                .with_timestamp(start + Duration::minutes(i as i64));
            let id = log.record(entry).unwrap();
            log.complete(id, 240.0 + error).unwrap();
        }
        DriftWindow::new("Driver", VERSION, log.window("Driver", &detector.window_query(VERSION)))
    }

    #[test]
    fn test_errors_at_baseline_do_not_drift() {
        let detector = DriftDetector::default();
        let window = logged_window(&detector, &[BASELINE; 20]);

        assert_eq!(window.len(), 20);
        assert!(matches!(
            detector.assess(&window, BASELINE),
            DriftAssessment::Stable { .. }
        ));
        assert!(detector.detect(&window, BASELINE).is_none());
    }

    #[test]
    fn test_last_five_at_double_error_drift_once() {
        let detector = DriftDetector::new(DriftConfig {
            threshold: DriftThreshold::Relative(0.2),
            ..DriftConfig::default()
        });
        let mut errors = vec![BASELINE; 15];
        errors.extend([2.0 * BASELINE; 5]);
        let window = logged_window(&detector, &errors);

        let events: Vec<DriftEvent> = detector.detect(&window, BASELINE).into_iter().collect();
        assert_eq!(events.len(), 1);

        // (15 * 2.0 + 5 * 4.0) / 20
        let event = &events[0];
        assert!((event.window_mae - 2.5).abs() < 1e-12);
        assert!((event.threshold - 2.4).abs() < 1e-12);
        assert_eq!(event.window_size, 20);
        assert_eq!(event.severity, DriftSeverity::Warning);
        assert_eq!(event.model_version, VERSION);
    }

    #[test]
    fn test_short_window_sees_only_recent_errors() {
        let detector = DriftDetector::new(DriftConfig {
            max_entries: 5,
            ..DriftConfig::default()
        });
        let mut errors = vec![BASELINE; 15];
        errors.extend([2.0 * BASELINE; 5]);
        let window = logged_window(&detector, &errors);

        let event = detector.detect(&window, BASELINE).unwrap();
        assert!((event.window_mae - 4.0).abs() < 1e-12);
        assert_eq!(event.window_size, 5);
        assert_eq!(event.severity, DriftSeverity::High);
    }

    #[test]
    fn test_too_few_samples_is_undetermined() {
        let detector = DriftDetector::default();
        let window = logged_window(&detector, &[50.0; 4]);
        assert_eq!(
            detector.assess(&window, BASELINE),
            DriftAssessment::Undetermined {
                samples: 4,
                required: 5
            }
        );
    }

    #[test]
    fn test_zero_baseline() {
        let relative = DriftDetector::default();
        let window = logged_window(&relative, &[1.0; 10]);
        assert_eq!(relative.assess(&window, 0.0), DriftAssessment::NoBaseline);

        let absolute = DriftDetector::new(DriftConfig {
            threshold: DriftThreshold::Absolute(0.5),
            ..DriftConfig::default()
        });
        let event = absolute.detect(&window, 0.0).unwrap();
        assert_eq!(event.severity, DriftSeverity::Critical);
    }

    #[test]
    fn test_severity_from_ratio() {
        assert_eq!(DriftSeverity::from_ratio(1.6), DriftSeverity::Warning);
        assert_eq!(DriftSeverity::from_ratio(2.0), DriftSeverity::High);
        assert_eq!(DriftSeverity::from_ratio(3.0), DriftSeverity::Critical);
    }

    #[test]
    fn test_threshold_limits() {
        assert_eq!(DriftThreshold::Relative(0.5).limit(4.0), Some(6.0));
        assert_eq!(DriftThreshold::Absolute(1.5).limit(4.0), Some(5.5));
        assert_eq!(DriftThreshold::Relative(0.5).limit(f64::NAN), None);
    }
}
