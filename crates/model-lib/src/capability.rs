//! Optional ML capabilities resolved once at startup

use serde::Serialize;

/// What this process is able to serve.
///
/// Passed by value to the trainer and predictor at construction; interval
/// producing code checks it instead of probing at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MlCapabilities {
    conformal_intervals: bool,
}

impl MlCapabilities {
    /// Resolve capabilities from the build and the deployment setting
    pub fn detect(intervals_enabled: bool) -> Self {
        Self {
            conformal_intervals: cfg!(feature = "conformal") && intervals_enabled,
        }
    }

    /// Point and interval predictions
    pub fn full() -> Self {
        Self {
            conformal_intervals: true,
        }
    }

    /// Point predictions only
    pub fn point_only() -> Self {
        Self {
            conformal_intervals: false,
        }
    }

    pub fn intervals_available(&self) -> bool {
        self.conformal_intervals
    }
}

impl Default for MlCapabilities {
    fn default() -> Self {
        Self::detect(true)
    }
}
