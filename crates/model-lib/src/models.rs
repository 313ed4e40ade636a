//! Core data models shared across the lifecycle components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Value used for a feature the caller did not supply
pub const MISSING_FEATURE_VALUE: f64 = 0.0;

/// Named numeric features for one shot, ordered by name
pub type FeatureMap = BTreeMap<String, f64>;

/// One labeled training example: features plus the observed outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRow {
    pub features: FeatureMap,
    pub outcome: f64,
}

impl LabeledRow {
    pub fn new(features: FeatureMap, outcome: f64) -> Self {
        Self { features, outcome }
    }

    fn is_usable(&self) -> bool {
        self.outcome.is_finite() && self.features.values().all(|v| v.is_finite())
    }
}

/// Labeled examples for a single subject
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub subject: String,
    pub rows: Vec<LabeledRow>,
}

impl Dataset {
    pub fn new(subject: impl Into<String>, rows: Vec<LabeledRow>) -> Self {
        Self {
            subject: subject.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sorted union of every feature name appearing in the rows
    pub fn feature_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.features.keys()).collect();
        names.into_iter().cloned().collect()
    }

    /// Rows whose outcome and features are all finite
    pub fn usable_rows(&self) -> Vec<&LabeledRow> {
        self.rows.iter().filter(|r| r.is_usable()).collect()
    }
}

/// Arrange a feature map into a dense vector following `names`.
///
/// Returns the vector and the names that had to be filled with
/// [`MISSING_FEATURE_VALUE`].
pub fn align_features(features: &FeatureMap, names: &[String]) -> (Vec<f64>, Vec<String>) {
    let mut missing = Vec::new();
    let values = names
        .iter()
        .map(|name| match features.get(name) {
            Some(v) => *v,
            None => {
                missing.push(name.clone());
                MISSING_FEATURE_VALUE
            }
        })
        .collect();
    (values, missing)
}

/// Model version identifier derived from the training timestamp (milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ModelVersion(u64);

impl ModelVersion {
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Derive the version for a model trained at `trained_at`.
    ///
    /// Always strictly greater than `previous`, so two runs inside the same
    /// millisecond still produce increasing versions.
    pub fn from_trained_at(trained_at: DateTime<Utc>, previous: Option<ModelVersion>) -> Self {
        let millis = trained_at.timestamp_millis().max(0) as u64;
        match previous {
            Some(prev) if prev.0 >= millis => Self(prev.0 + 1),
            _ => Self(millis),
        }
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for ModelVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('v')
            .and_then(|digits| digits.parse::<u64>().ok())
            .map(Self)
            .ok_or_else(|| format!("invalid model version '{}'", s))
    }
}

impl From<ModelVersion> for String {
    fn from(v: ModelVersion) -> Self {
        v.to_string()
    }
}

impl TryFrom<String> for ModelVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Regularization regime chosen from the training-set size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetTier {
    Small,
    Medium,
    Large,
}

impl DatasetTier {
    /// Lower bound (inclusive) of the medium tier
    pub const MEDIUM_MIN: usize = 1000;
    /// Lower bound (inclusive) of the large tier
    pub const LARGE_MIN: usize = 3000;

    pub fn for_sample_count(n: usize) -> Self {
        if n >= Self::LARGE_MIN {
            DatasetTier::Large
        } else if n >= Self::MEDIUM_MIN {
            DatasetTier::Medium
        } else {
            DatasetTier::Small
        }
    }
}

impl fmt::Display for DatasetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetTier::Small => write!(f, "small"),
            DatasetTier::Medium => write!(f, "medium"),
            DatasetTier::Large => write!(f, "large"),
        }
    }
}

/// Identifier of a served prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionId(Uuid);

impl PredictionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PredictionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PredictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PredictionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Filesystem-safe directory/file stem for a subject.
///
/// Subjects are free-form ("7 Iron", "Driver"), so the readable slug carries
/// a short hash of the raw name to keep distinct subjects apart.
pub fn subject_slug(subject: &str) -> String {
    let readable: String = subject
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let readable = readable.trim_matches('-');
    let digest = hex::encode(Sha256::digest(subject.as_bytes()));
    if readable.is_empty() {
        format!("subject-{}", &digest[..8])
    } else {
        format!("{}-{}", readable, &digest[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(pairs: &[(&str, f64)], outcome: f64) -> LabeledRow {
        LabeledRow::new(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(), outcome)
    }

    #[test]
    fn test_feature_names_are_sorted_union() {
        let dataset = Dataset::new(
            "7 Iron",
            vec![row(&[("club_speed", 80.0)], 150.0), row(&[("attack_angle", -3.0)], 148.0)],
        );
        assert_eq!(dataset.feature_names(), vec!["attack_angle", "club_speed"]);
    }

    #[test]
    fn test_usable_rows_drop_non_finite() {
        let dataset = Dataset::new(
            "Driver",
            vec![
                row(&[("club_speed", 100.0)], 230.0),
                row(&[("club_speed", f64::NAN)], 230.0),
                row(&[("club_speed", 100.0)], f64::INFINITY),
            ],
        );
        assert_eq!(dataset.usable_rows().len(), 1);
    }

    #[test]
    fn test_align_features_reports_missing() {
        let features: FeatureMap = [("a".to_string(), 1.0)].into_iter().collect();
        let names = vec!["a".to_string(), "b".to_string()];
        let (values, missing) = align_features(&features, &names);
        assert_eq!(values, vec![1.0, MISSING_FEATURE_VALUE]);
        assert_eq!(missing, vec!["b".to_string()]);
    }

    #[test]
    fn test_model_version_monotonic() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let first = ModelVersion::from_trained_at(ts, None);
        assert_eq!(first.as_millis(), 1_700_000_000_000);

        // Same millisecond as the previous version
        let second = ModelVersion::from_trained_at(ts, Some(first));
        assert!(second > first);

        // Clock went backwards
        let earlier = Utc.timestamp_millis_opt(1_600_000_000_000).unwrap();
        let third = ModelVersion::from_trained_at(earlier, Some(second));
        assert!(third > second);
    }

    #[test]
    fn test_model_version_round_trips_through_string() {
        let version = ModelVersion::new(42);
        assert_eq!(version.to_string(), "v42");
        assert_eq!("v42".parse::<ModelVersion>().unwrap(), version);
        assert!("42".parse::<ModelVersion>().is_err());
    }

    #[test]
    fn test_subject_slug_distinguishes_subjects() {
        let a = subject_slug("7 Iron");
        let b = subject_slug("7-Iron");
        assert!(a.starts_with("7-iron-"));
        assert_ne!(a, b);
        assert!(subject_slug("??").starts_with("subject-"));
    }
}
