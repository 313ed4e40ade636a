//! Per-subject retrain trigger state and its persistence

use crate::models::subject_slug;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainState {
    Monitoring,
    DriftAccumulating,
    RetrainTriggered,
    Retraining,
    Cooldown,
}

impl RetrainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrainState::Monitoring => "monitoring",
            RetrainState::DriftAccumulating => "drift_accumulating",
            RetrainState::RetrainTriggered => "retrain_triggered",
            RetrainState::Retraining => "retraining",
            RetrainState::Cooldown => "cooldown",
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, RetrainState::RetrainTriggered | RetrainState::Retraining)
    }
}

impl fmt::Display for RetrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one drift event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum DriftDisposition {
    /// Counted toward the trigger threshold
    Accumulating { count: u32, threshold: u32 },
    /// Threshold reached; one retraining cycle was scheduled
    Triggered { count: u32 },
    /// A cycle is already scheduled or running
    AlreadyRetraining,
    /// Recorded, but the subject is cooling down after a failure
    InCooldown { until: DateTime<Utc> },
}

/// Trigger state for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainTriggerState {
    pub subject: String,
    pub state: RetrainState,
    pub consecutive_drift_count: u32,
    pub last_drift_at: Option<DateTime<Utc>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// MAE of the model published by the last successful cycle
    pub baseline_mae: Option<f64>,
    pub last_failure: Option<String>,
    pub retrain_attempts: u32,
    pub retrain_failures: u32,
    pub updated_at: DateTime<Utc>,
}

impl RetrainTriggerState {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            state: RetrainState::Monitoring,
            consecutive_drift_count: 0,
            last_drift_at: None,
            last_triggered_at: None,
            cooldown_until: None,
            baseline_mae: None,
            last_failure: None,
            retrain_attempts: 0,
            retrain_failures: 0,
            updated_at: Utc::now(),
        }
    }

    /// Apply one drift event.
    ///
    /// The counter only goes back to zero after a successful retrain.
    pub fn on_drift(&mut self, now: DateTime<Utc>, threshold: u32) -> DriftDisposition {
        self.last_drift_at = Some(now);
        self.updated_at = now;

        if self.state == RetrainState::Cooldown {
            match self.cooldown_until {
                Some(until) if until > now => {
                    self.consecutive_drift_count += 1;
                    return DriftDisposition::InCooldown { until };
                }
                _ => {
                    self.state = RetrainState::Monitoring;
                    self.cooldown_until = None;
                }
            }
        }

        if self.state.is_busy() {
            self.consecutive_drift_count += 1;
            return DriftDisposition::AlreadyRetraining;
        }

        self.consecutive_drift_count += 1;
        if self.consecutive_drift_count >= threshold.max(1) {
            self.state = RetrainState::RetrainTriggered;
            self.last_triggered_at = Some(now);
            DriftDisposition::Triggered {
                count: self.consecutive_drift_count,
            }
        } else {
            self.state = RetrainState::DriftAccumulating;
            DriftDisposition::Accumulating {
                count: self.consecutive_drift_count,
                threshold,
            }
        }
    }

    pub fn begin_retraining(&mut self, now: DateTime<Utc>) {
        self.state = RetrainState::Retraining;
        self.retrain_attempts += 1;
        self.updated_at = now;
    }

    pub fn retrain_succeeded(&mut self, now: DateTime<Utc>, baseline_mae: f64) {
        self.state = RetrainState::Monitoring;
        self.consecutive_drift_count = 0;
        self.cooldown_until = None;
        self.baseline_mae = Some(baseline_mae);
        self.last_failure = None;
        self.updated_at = now;
    }

    pub fn retrain_failed(&mut self, now: DateTime<Utc>, reason: impl Into<String>, cooldown: Duration) {
        self.state = RetrainState::Cooldown;
        self.cooldown_until = Some(now + cooldown);
        self.last_failure = Some(reason.into());
        self.retrain_failures += 1;
        self.updated_at = now;
    }

    /// A cycle cannot survive a restart; resume monitoring with the counter intact
    pub fn recover(&mut self) -> bool {
        if self.state.is_busy() {
            self.state = RetrainState::Monitoring;
            true
        } else {
            false
        }
    }
}

/// JSON files holding trigger state, one per subject
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: Option<PathBuf>,
}

impl StateStore {
    pub fn in_memory() -> Self {
        Self { dir: None }
    }

    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory {:?}", dir))?;
        Ok(Self { dir: Some(dir) })
    }

    pub fn load_all(&self) -> Result<Vec<RetrainTriggerState>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };

        let mut states = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_state(&path) {
                Ok(state) => states.push(state),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable retrain state"),
            }
        }
        Ok(states)
    }

    /// Write atomically (temp file, fsync, rename)
    pub fn save(&self, state: &RetrainTriggerState) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        let path = dir.join(format!("{}.json", subject_slug(&state.subject)));
        let temp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state).context("Failed to serialize retrain state")?;

        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create temp state file {:?}", temp_path))?;
        file.write_all(&bytes).context("Failed to write retrain state")?;
        file.sync_all().context("Failed to sync retrain state")?;

        fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
        Ok(())
    }
}

fn read_state(path: &Path) -> Result<RetrainTriggerState> {
    let raw = fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}
