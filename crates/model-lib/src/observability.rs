//! Observability for the model lifecycle
//!
//! Provides:
//! - Prometheus metrics (prediction latency, training duration, drift and retrain counters)
//! - Structured JSON logging with tracing

use crate::drift::{DriftEvent, DriftSeverity};
use crate::models::ModelVersion;
use crate::retrain::{DriftDisposition, RetrainState};
use crate::store::ModelMetadata;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter_vec, GaugeVec, Histogram,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for prediction latency (seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Histogram buckets for training duration (seconds)
const TRAINING_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

static GLOBAL_METRICS: OnceLock<LifecycleMetricsInner> = OnceLock::new();

struct LifecycleMetricsInner {
    prediction_latency_seconds: Histogram,
    predictions_served: IntCounterVec,
    intervals_unavailable: IntCounterVec,
    outcomes_recorded: IntCounterVec,
    drift_events: IntCounterVec,
    retrains: IntCounterVec,
    training_duration_seconds: Histogram,
    model_version_info: GaugeVec,
}

impl LifecycleMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram!(
                "shot_model_prediction_latency_seconds",
                "Time spent serving a prediction",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions_served: register_int_counter_vec!(
                "shot_model_predictions_served_total",
                "Predictions served, by subject and kind",
                &["subject", "kind"]
            )
            .expect("Failed to register predictions_served"),

            intervals_unavailable: register_int_counter_vec!(
                "shot_model_intervals_unavailable_total",
                "Interval requests answered with a point estimate only",
                &["reason"]
            )
            .expect("Failed to register intervals_unavailable"),

            outcomes_recorded: register_int_counter_vec!(
                "shot_model_outcomes_recorded_total",
                "Observed outcomes attached to predictions",
                &["subject"]
            )
            .expect("Failed to register outcomes_recorded"),

            drift_events: register_int_counter_vec!(
                "shot_model_drift_events_total",
                "Drift events emitted, by severity",
                &["subject", "severity"]
            )
            .expect("Failed to register drift_events"),

            retrains: register_int_counter_vec!(
                "shot_model_retrains_total",
                "Retraining cycles, by result",
                &["subject", "result"]
            )
            .expect("Failed to register retrains"),

            training_duration_seconds: register_histogram!(
                "shot_model_training_duration_seconds",
                "Wall time of a fetch-and-train step",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            model_version_info: register_gauge_vec!(
                "shot_model_version_info",
                "Currently published model version per subject",
                &["subject", "version"]
            )
            .expect("Failed to register model_version_info"),
        }
    }
}

/// Handle to the process-wide lifecycle metrics.
///
/// Clones share the same underlying registry entries.
#[derive(Clone)]
pub struct LifecycleMetrics {
    _private: (),
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(LifecycleMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &LifecycleMetricsInner {
        GLOBAL_METRICS.get_or_init(LifecycleMetricsInner::new)
    }

    pub fn observe_prediction(&self, subject: &str, with_interval: bool, duration_secs: f64) {
        let kind = if with_interval { "interval" } else { "point" };
        self.inner().prediction_latency_seconds.observe(duration_secs);
        self.inner()
            .predictions_served
            .with_label_values(&[subject, kind])
            .inc();
    }

    pub fn inc_interval_unavailable(&self, reason: &str) {
        self.inner()
            .intervals_unavailable
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_outcomes_recorded(&self, subject: &str) {
        self.inner()
            .outcomes_recorded
            .with_label_values(&[subject])
            .inc();
    }

    pub fn inc_drift_event(&self, subject: &str, severity: DriftSeverity) {
        self.inner()
            .drift_events
            .with_label_values(&[subject, severity.as_str()])
            .inc();
    }

    /// `result` is one of `started`, `succeeded`, `failed`
    pub fn inc_retrain(&self, subject: &str, result: &str) {
        self.inner()
            .retrains
            .with_label_values(&[subject, result])
            .inc();
    }

    pub fn observe_training_duration(&self, duration_secs: f64) {
        self.inner().training_duration_seconds.observe(duration_secs);
    }

    pub fn set_model_version(&self, subject: &str, version: ModelVersion) {
        let gauge = &self.inner().model_version_info;
        // Only the newest version of a subject carries the value 1
        for old in published_versions(gauge, subject) {
            let _ = gauge.remove_label_values(&[subject, &old]);
        }
        gauge
            .with_label_values(&[subject, &version.to_string()])
            .set(1.0);
    }
}

fn published_versions(gauge: &GaugeVec, subject: &str) -> Vec<String> {
    use prometheus::core::Collector;

    let mut versions = Vec::new();
    for family in gauge.collect() {
        for metric in family.get_metric() {
            let labels = metric.get_label();
            let matches_subject = labels
                .iter()
                .any(|l| l.get_name() == "subject" && l.get_value() == subject);
            if !matches_subject {
                continue;
            }
            if let Some(version) = labels.iter().find(|l| l.get_name() == "version") {
                versions.push(version.get_value().to_string());
            }
        }
    }
    versions
}

/// Structured logger for lifecycle events
///
/// Every record carries an `event` field so log pipelines can route on it.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_prediction(
        &self,
        subject: &str,
        prediction_id: &str,
        predicted_value: f64,
        interval: Option<(f64, f64)>,
        model_version: ModelVersion,
    ) {
        info!(
            event = "prediction_served",
            service = %self.service,
            subject = %subject,
            prediction_id = %prediction_id,
            predicted_value = predicted_value,
            lower_bound = ?interval.map(|i| i.0),
            upper_bound = ?interval.map(|i| i.1),
            model_version = %model_version,
            "Prediction served"
        );
    }

    pub fn log_outcome(&self, subject: &str, prediction_id: &str, predicted: f64, actual: f64) {
        info!(
            event = "outcome_recorded",
            service = %self.service,
            subject = %subject,
            prediction_id = %prediction_id,
            predicted_value = predicted,
            actual_value = actual,
            absolute_error = (actual - predicted).abs(),
            "Outcome recorded"
        );
    }

    pub fn log_drift(&self, event: &DriftEvent, disposition: &DriftDisposition) {
        let severity = event.severity.as_str();
        match event.severity {
            DriftSeverity::Critical => warn!(
                event = "drift_detected",
                service = %self.service,
                subject = %event.subject,
                severity = %severity,
                window_mae = event.window_mae,
                baseline_mae = event.baseline_mae,
                threshold = event.threshold,
                window_size = event.window_size,
                model_version = %event.model_version,
                disposition = ?disposition,
                "Critical predictive drift detected"
            ),
            _ => info!(
                event = "drift_detected",
                service = %self.service,
                subject = %event.subject,
                severity = %severity,
                window_mae = event.window_mae,
                baseline_mae = event.baseline_mae,
                threshold = event.threshold,
                window_size = event.window_size,
                model_version = %event.model_version,
                disposition = ?disposition,
                "Predictive drift detected"
            ),
        }
    }

    pub fn log_state_change(&self, subject: &str, from: RetrainState, to: RetrainState, reason: &str) {
        info!(
            event = "retrain_state_changed",
            service = %self.service,
            subject = %subject,
            from = %from,
            to = %to,
            reason = %reason,
            "Retrain state changed"
        );
    }

    pub fn log_model_published(&self, metadata: &ModelMetadata, trigger: &str) {
        info!(
            event = "model_published",
            service = %self.service,
            subject = %metadata.subject,
            version = %metadata.version,
            sample_count = metadata.sample_count,
            tier = %metadata.dataset_tier,
            mae = metadata.accuracy.mae,
            calibrated = metadata.calibration.is_calibrated(),
            trigger = %trigger,
            "Model version published"
        );
    }

    pub fn log_retrain_failed(&self, subject: &str, operation: &str, error: &str) {
        warn!(
            event = "retrain_failed",
            service = %self.service,
            subject = %subject,
            operation = %operation,
            error = %error,
            "Retraining failed, entering cooldown"
        );
    }

    pub fn log_startup(&self, version: &str, subjects: usize) {
        info!(
            event = "service_started",
            service = %self.service,
            service_version = %version,
            subjects = subjects,
            "Shot model service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "Shot model service shutting down"
        );
    }
}
