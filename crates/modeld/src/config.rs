//! Service configuration

use anyhow::{bail, Context, Result};
use model_lib::drift::{DriftConfig, DriftThreshold};
use model_lib::retrain::OrchestratorConfig;
use model_lib::training::TrainerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory (any extension `config` supports)
pub const DEFAULT_CONFIG_FILE: &str = "shot-modeld";

/// Prefix of environment overrides, e.g. `SHOTML_API_PORT=9000`
pub const ENV_PREFIX: &str = "SHOTML";

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// HTTP port for predictions, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "default_prediction_log_dir")]
    pub prediction_log_dir: PathBuf,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// One `<subject>.jsonl` file of labeled shots per subject
    #[serde(default = "default_training_data_dir")]
    pub training_data_dir: PathBuf,

    /// Most recent completed predictions in a drift window
    #[serde(default = "default_drift_window_entries")]
    pub drift_window_entries: usize,

    /// Age bound of a drift window; 0 disables it
    #[serde(default = "default_drift_window_days")]
    pub drift_window_days: i64,

    #[serde(default = "default_drift_min_samples")]
    pub drift_min_samples: usize,

    /// `relative` or `absolute`
    #[serde(default = "default_drift_threshold_kind")]
    pub drift_threshold_kind: String,

    #[serde(default = "default_drift_threshold_value")]
    pub drift_threshold_value: f64,

    /// Consecutive drift events before a retrain
    #[serde(default = "default_retrain_drift_threshold")]
    pub retrain_drift_threshold: u32,

    #[serde(default = "default_retrain_cooldown_secs")]
    pub retrain_cooldown_secs: u64,

    #[serde(default = "default_training_timeout_secs")]
    pub training_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub intervals_enabled: bool,

    #[serde(default = "default_confidence")]
    pub default_confidence: f64,

    #[serde(default = "default_keep_versions")]
    pub keep_versions: usize,

    /// Predictions older than this are pruned from the log
    #[serde(default = "default_prediction_retention_days")]
    pub prediction_retention_days: i64,

    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// Subjects trained at startup when they have no published model
    #[serde(default)]
    pub bootstrap_subjects: Vec<String>,

    /// Capacity of the outcome notification queue
    #[serde(default = "default_outcome_queue_capacity")]
    pub outcome_queue_capacity: usize,
}

fn default_api_port() -> u16 {
    8080
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("data/models")
}

fn default_prediction_log_dir() -> PathBuf {
    PathBuf::from("data/predictions")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("data/retrain-state")
}

fn default_training_data_dir() -> PathBuf {
    PathBuf::from("data/training")
}

fn default_drift_window_entries() -> usize {
    20
}

fn default_drift_window_days() -> i64 {
    30
}

fn default_drift_min_samples() -> usize {
    5
}

fn default_drift_threshold_kind() -> String {
    "relative".to_string()
}

fn default_drift_threshold_value() -> f64 {
    0.5
}

fn default_retrain_drift_threshold() -> u32 {
    3
}

fn default_retrain_cooldown_secs() -> u64 {
    3600
}

fn default_training_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_confidence() -> f64 {
    0.95
}

fn default_keep_versions() -> usize {
    5
}

fn default_prediction_retention_days() -> i64 {
    90
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

fn default_outcome_queue_capacity() -> usize {
    1024
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            model_dir: default_model_dir(),
            prediction_log_dir: default_prediction_log_dir(),
            state_dir: default_state_dir(),
            training_data_dir: default_training_data_dir(),
            drift_window_entries: default_drift_window_entries(),
            drift_window_days: default_drift_window_days(),
            drift_min_samples: default_drift_min_samples(),
            drift_threshold_kind: default_drift_threshold_kind(),
            drift_threshold_value: default_drift_threshold_value(),
            retrain_drift_threshold: default_retrain_drift_threshold(),
            retrain_cooldown_secs: default_retrain_cooldown_secs(),
            training_timeout_secs: default_training_timeout_secs(),
            intervals_enabled: true,
            default_confidence: default_confidence(),
            keep_versions: default_keep_versions(),
            prediction_retention_days: default_prediction_retention_days(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            bootstrap_subjects: Vec::new(),
            outcome_queue_capacity: default_outcome_queue_capacity(),
        }
    }
}

impl ServiceConfig {
    /// Load from `shot-modeld.*` in the working directory and `SHOTML_*` variables
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE), false)
    }

    /// Load from an explicit file; environment variables still override it
    pub fn load_from(path: &Path, required: bool) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("bootstrap_subjects"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {:?}", path))?;

        let config: ServiceConfig = settings
            .try_deserialize()
            .context("Invalid service configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.default_confidence > 0.0 && self.default_confidence < 1.0) {
            bail!("default_confidence must be in (0, 1), got {}", self.default_confidence);
        }
        if !self.drift_threshold_value.is_finite() || self.drift_threshold_value < 0.0 {
            bail!("drift_threshold_value must be a non-negative number");
        }
        if self.retrain_drift_threshold == 0 {
            bail!("retrain_drift_threshold must be at least 1");
        }
        if self.keep_versions == 0 {
            bail!("keep_versions must be at least 1");
        }
        self.drift_threshold()?;
        Ok(())
    }

    pub fn drift_threshold(&self) -> Result<DriftThreshold> {
        match self.drift_threshold_kind.to_ascii_lowercase().as_str() {
            "relative" => Ok(DriftThreshold::Relative(self.drift_threshold_value)),
            "absolute" => Ok(DriftThreshold::Absolute(self.drift_threshold_value)),
            other => bail!("unknown drift_threshold_kind '{}', expected relative or absolute", other),
        }
    }

    pub fn drift_config(&self) -> Result<DriftConfig> {
        Ok(DriftConfig {
            max_entries: self.drift_window_entries,
            max_age: (self.drift_window_days > 0).then(|| chrono::Duration::days(self.drift_window_days)),
            min_samples: self.drift_min_samples,
            threshold: self.drift_threshold()?,
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            drift_threshold: self.retrain_drift_threshold,
            cooldown: Duration::from_secs(self.retrain_cooldown_secs),
            training_timeout: Duration::from_secs(self.training_timeout_secs),
            keep_versions: self.keep_versions,
        }
    }

    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            confidence_level: self.default_confidence,
            ..TrainerConfig::default()
        }
    }

    pub fn prediction_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.prediction_retention_days.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.retrain_drift_threshold, 3);
        assert_eq!(config.drift_threshold().unwrap(), DriftThreshold::Relative(0.5));
        assert_eq!(config.orchestrator_config().cooldown, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "api_port = 9100\ndrift_threshold_kind = \"absolute\"\ndrift_threshold_value = 4.0\nbootstrap_subjects = [\"Driver\", \"7 Iron\"]"
        )
        .unwrap();

        let config = ServiceConfig::load_from(file.path(), true).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.drift_threshold().unwrap(), DriftThreshold::Absolute(4.0));
        assert_eq!(config.bootstrap_subjects, vec!["Driver".to_string(), "7 Iron".to_string()]);
        assert_eq!(config.keep_versions, 5);
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = ServiceConfig {
            default_confidence: 1.0,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServiceConfig {
            drift_threshold_kind: "sideways".to_string(),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
