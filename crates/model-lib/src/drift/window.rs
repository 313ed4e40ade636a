//! Rolling window of completed predictions

use crate::models::ModelVersion;
use crate::prediction_log::PredictionLogEntry;

/// Completed predictions served by one model version, most recent first.
///
/// Rebuilt from the prediction log on every assessment, so it survives
/// restarts without state of its own.
#[derive(Debug, Clone)]
pub struct DriftWindow {
    subject: String,
    model_version: ModelVersion,
    entries: Vec<PredictionLogEntry>,
}

impl DriftWindow {
    /// Keep only completed entries of `subject` served by `model_version`
    pub fn new(subject: impl Into<String>, model_version: ModelVersion, entries: Vec<PredictionLogEntry>) -> Self {
        let subject = subject.into();
        let entries = entries
            .into_iter()
            .filter(|e| e.is_completed() && e.model_version == model_version && e.subject == subject)
            .collect();
        Self {
            subject,
            model_version,
            entries,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn model_version(&self) -> ModelVersion {
        self.model_version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PredictionLogEntry] {
        &self.entries
    }

    /// Mean absolute error of the window, `None` when empty
    pub fn mae(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let total: f64 = self.entries.iter().filter_map(|e| e.absolute_error()).sum();
        Some(total / self.entries.len() as f64)
    }
}
