//! Versioned on-disk model store
//!
//! Layout:
//!
//! ```text
//! <root>/<subject-slug>/<version>/artifact.bin     bincode model blob
//! <root>/<subject-slug>/<version>/metadata.json    metadata sidecar
//! ```
//!
//! A version directory is assembled under `.staging-*` and published with a
//! single rename, so readers see either the complete pair or nothing.

use crate::error::StoreError;
use crate::models::{subject_slug, DatasetTier, ModelVersion};
use crate::training::{
    AccuracySummary, CalibrationStatus, ConformalCalibrator, GradientBoostedTrees, Hyperparameters,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ARTIFACT_FILE: &str = "artifact.bin";
pub const METADATA_FILE: &str = "metadata.json";
const STAGING_PREFIX: &str = ".staging-";
const METADATA_FORMAT_VERSION: u32 = 1;

/// Fitted model: base regressor, its feature ordering and optional calibrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub booster: GradientBoostedTrees,
    pub calibrator: Option<ConformalCalibrator>,
}

impl ModelArtifact {
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.booster.predict(row)
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }
}

/// Description of one trained model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub subject: String,
    pub version: ModelVersion,
    pub trained_at: DateTime<Utc>,
    /// All usable rows seen by the run (training plus evaluation)
    pub sample_count: usize,
    pub training_rows: usize,
    pub evaluation_rows: usize,
    pub feature_names: Vec<String>,
    pub accuracy: AccuracySummary,
    pub confidence_level: f64,
    pub dataset_tier: DatasetTier,
    pub hyperparameters: Hyperparameters,
    pub calibration: CalibrationStatus,
}

/// Sidecar envelope tying metadata to the artifact bytes it describes
#[derive(Debug, Serialize, Deserialize)]
struct MetadataRecord {
    format_version: u32,
    artifact_sha256: String,
    #[serde(flatten)]
    metadata: ModelMetadata,
}

/// A model read back from the store
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub subject: String,
    pub version: ModelVersion,
    pub artifact: ModelArtifact,
    /// `None` for legacy or unreadable sidecars
    pub metadata: Option<ModelMetadata>,
    /// Resolved feature ordering; always the artifact's own
    pub feature_names: Vec<String>,
}

impl LoadedModel {
    pub fn has_calibration(&self) -> bool {
        self.artifact.calibrator.is_some()
    }
}

/// Filesystem-backed model store
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn subject_dir(&self, subject: &str) -> PathBuf {
        self.root.join(subject_slug(subject))
    }

    fn version_dir(&self, subject: &str, version: ModelVersion) -> PathBuf {
        self.subject_dir(subject).join(version.to_string())
    }

    /// Persist an artifact and its metadata as one version
    pub fn save(&self, artifact: &ModelArtifact, metadata: &ModelMetadata) -> Result<PathBuf, StoreError> {
        let subject_dir = self.subject_dir(&metadata.subject);
        fs::create_dir_all(&subject_dir).map_err(|e| StoreError::io(&subject_dir, e))?;

        let final_dir = subject_dir.join(metadata.version.to_string());
        if final_dir.exists() {
            return Err(StoreError::VersionExists {
                subject: metadata.subject.clone(),
                version: metadata.version,
            });
        }

        let artifact_bytes =
            bincode::serialize(artifact).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let checksum = compute_checksum(&artifact_bytes);
        let record = MetadataRecord {
            format_version: METADATA_FORMAT_VERSION,
            artifact_sha256: checksum.clone(),
            metadata: metadata.clone(),
        };
        let metadata_bytes =
            serde_json::to_vec_pretty(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let staging = subject_dir.join(format!(
            "{}{}-{}",
            STAGING_PREFIX,
            metadata.version,
            Uuid::new_v4().simple()
        ));
        let published = fs::create_dir(&staging)
            .and_then(|_| write_synced(&staging.join(ARTIFACT_FILE), &artifact_bytes))
            .and_then(|_| write_synced(&staging.join(METADATA_FILE), &metadata_bytes))
            .and_then(|_| fs::rename(&staging, &final_dir));

        if let Err(e) = published {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                debug!(path = %staging.display(), error = %cleanup, "Failed to remove staging directory");
            }
            return Err(StoreError::io(&final_dir, e));
        }

        info!(
            subject = %metadata.subject,
            version = %metadata.version,
            path = %final_dir.display(),
            checksum = %checksum,
            size = artifact_bytes.len(),
            "Model version published"
        );

        Ok(final_dir)
    }

    /// Load a specific version
    pub fn load(&self, subject: &str, version: ModelVersion) -> Result<LoadedModel, StoreError> {
        let dir = self.version_dir(subject, version);
        if !dir.is_dir() {
            return Err(StoreError::ModelNotFound {
                subject: subject.to_string(),
                version: Some(version),
            });
        }

        let artifact_path = dir.join(ARTIFACT_FILE);
        let bytes = fs::read(&artifact_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::Corrupt {
                path: artifact_path.clone(),
                reason: "artifact file is missing".to_string(),
            },
            _ => StoreError::io(&artifact_path, e),
        })?;
        let artifact: ModelArtifact = bincode::deserialize(&bytes).map_err(|e| StoreError::Corrupt {
            path: artifact_path.clone(),
            reason: e.to_string(),
        })?;

        let metadata = read_metadata(&dir.join(METADATA_FILE), &bytes, subject, version);
        if let Some(meta) = &metadata {
            if meta.feature_names != artifact.feature_names {
                warn!(
                    subject = %subject,
                    version = %version,
                    metadata_features = meta.feature_names.len(),
                    artifact_features = artifact.n_features(),
                    "Metadata feature list disagrees with artifact, using artifact ordering"
                );
            }
        }

        debug!(subject = %subject, version = %version, legacy = metadata.is_none(), "Model loaded");

        Ok(LoadedModel {
            subject: subject.to_string(),
            version,
            feature_names: artifact.feature_names.clone(),
            artifact,
            metadata,
        })
    }

    /// Load the most recent published version
    pub fn load_latest(&self, subject: &str) -> Result<LoadedModel, StoreError> {
        match self.latest(subject)? {
            Some(version) => self.load(subject, version),
            None => Err(StoreError::ModelNotFound {
                subject: subject.to_string(),
                version: None,
            }),
        }
    }

    pub fn latest(&self, subject: &str) -> Result<Option<ModelVersion>, StoreError> {
        Ok(self.versions(subject)?.pop())
    }

    /// Published versions for a subject, oldest first
    pub fn versions(&self, subject: &str) -> Result<Vec<ModelVersion>, StoreError> {
        let dir = self.subject_dir(subject);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Ok(version) = name.parse::<ModelVersion>() {
                if entry.path().is_dir() {
                    versions.push(version);
                }
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Remove all but the newest `keep` versions; returns what was removed
    pub fn prune(&self, subject: &str, keep: usize) -> Result<Vec<ModelVersion>, StoreError> {
        let versions = self.versions(subject)?;
        let excess = versions.len().saturating_sub(keep.max(1));
        let mut removed = Vec::with_capacity(excess);

        for version in versions.into_iter().take(excess) {
            let dir = self.version_dir(subject, version);
            fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
            removed.push(version);
        }

        if !removed.is_empty() {
            info!(subject = %subject, removed = removed.len(), "Pruned old model versions");
        }
        Ok(removed)
    }
}

/// Read and validate the sidecar. Any problem yields `None` (legacy load).
fn read_metadata(path: &Path, artifact_bytes: &[u8], subject: &str, version: ModelVersion) -> Option<ModelMetadata> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(subject = %subject, version = %version, "No metadata sidecar, loading as legacy model");
            return None;
        }
        Err(e) => {
            warn!(subject = %subject, version = %version, error = %e, "Failed to read metadata sidecar");
            return None;
        }
    };

    let record: MetadataRecord = match serde_json::from_slice(&raw) {
        Ok(record) => record,
        Err(e) => {
            warn!(subject = %subject, version = %version, error = %e, "Unparsable metadata sidecar, ignoring it");
            return None;
        }
    };

    if record.format_version != METADATA_FORMAT_VERSION {
        warn!(
            subject = %subject,
            version = %version,
            format_version = record.format_version,
            "Unsupported metadata format, ignoring it"
        );
        return None;
    }

    let actual = compute_checksum(artifact_bytes);
    if record.artifact_sha256 != actual {
        warn!(
            subject = %subject,
            version = %version,
            expected = %record.artifact_sha256,
            actual = %actual,
            "Metadata checksum does not match artifact, ignoring metadata"
        );
        return None;
    }

    if record.metadata.version != version {
        warn!(
            subject = %subject,
            version = %version,
            metadata_version = %record.metadata.version,
            "Metadata describes a different version, ignoring it"
        );
        return None;
    }

    Some(record.metadata)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// SHA-256 of the artifact bytes, hex encoded
fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::train;
    use tempfile::TempDir;

    fn store() -> (TempDir, ModelStore) {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::open(dir.path().join("models")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_then_load_keeps_metadata_consistent() {
        let (_dir, store) = store();
        let trained = train("Driver", 60);
        store.save(&trained.artifact, &trained.metadata).unwrap();

        let loaded = store.load_latest("Driver").unwrap();
        let metadata = loaded.metadata.as_ref().unwrap();
        assert_eq!(loaded.version, trained.metadata.version);
        assert_eq!(metadata.feature_names.len(), loaded.artifact.n_features());
        assert_eq!(metadata, &trained.metadata);
        assert_eq!(loaded.artifact, trained.artifact);
    }

    #[test]
    fn test_missing_metadata_loads_as_legacy() {
        let (_dir, store) = store();
        let trained = train("Driver", 60);
        let path = store.save(&trained.artifact, &trained.metadata).unwrap();
        fs::remove_file(path.join(METADATA_FILE)).unwrap();

        let loaded = store.load("Driver", trained.metadata.version).unwrap();
        assert!(loaded.metadata.is_none());
        assert_eq!(loaded.feature_names, vec!["club_speed", "launch_angle"]);
    }

    #[test]
    fn test_corrupt_metadata_loads_as_legacy() {
        let (_dir, store) = store();
        let trained = train("Driver", 60);
        let path = store.save(&trained.artifact, &trained.metadata).unwrap();
        fs::write(path.join(METADATA_FILE), b"{ not json").unwrap();

        let loaded = store.load_latest("Driver").unwrap();
        assert!(loaded.metadata.is_none());
    }

    #[test]
    fn test_checksum_mismatch_drops_metadata() {
        let (_dir, store) = store();
        let trained = train("Driver", 60);
        let path = store.save(&trained.artifact, &trained.metadata).unwrap();

        let meta_path = path.join(METADATA_FILE);
        let mut record: serde_json::Value = serde_json::from_slice(&fs::read(&meta_path).unwrap()).unwrap();
        record["artifact_sha256"] = serde_json::json!("00");
        fs::write(&meta_path, serde_json::to_vec(&record).unwrap()).unwrap();

        assert!(store.load_latest("Driver").unwrap().metadata.is_none());
    }

    #[test]
    fn test_feature_mismatch_uses_artifact_ordering() {
        let (_dir, store) = store();
        let mut trained = train("Driver", 60);
        trained.metadata.feature_names.push("spin_rate".to_string());
        store.save(&trained.artifact, &trained.metadata).unwrap();

        let loaded = store.load_latest("Driver").unwrap();
        assert_eq!(loaded.metadata.as_ref().unwrap().feature_names.len(), 3);
        assert_eq!(loaded.feature_names, trained.artifact.feature_names);
    }

    #[test]
    fn test_corrupt_artifact_is_an_error() {
        let (_dir, store) = store();
        let trained = train("Driver", 60);
        let path = store.save(&trained.artifact, &trained.metadata).unwrap();
        fs::write(path.join(ARTIFACT_FILE), b"garbage").unwrap();

        let err = store.load_latest("Driver").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_unknown_subject_is_not_found() {
        let (_dir, store) = store();
        assert!(store.load_latest("Hybrid").unwrap_err().is_not_found());
        assert!(store.versions("Hybrid").unwrap().is_empty());
        assert!(store
            .load("Hybrid", ModelVersion::new(1))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let (_dir, store) = store();
        let trained = train("Driver", 60);
        store.save(&trained.artifact, &trained.metadata).unwrap();
        let err = store.save(&trained.artifact, &trained.metadata).unwrap_err();
        assert!(matches!(err, StoreError::VersionExists { .. }));
    }

    #[test]
    fn test_staging_directories_are_invisible() {
        let (_dir, store) = store();
        let trained = train("Driver", 60);
        store.save(&trained.artifact, &trained.metadata).unwrap();

        let half_written = store
            .subject_dir("Driver")
            .join(format!("{}v99999999999999-abc", STAGING_PREFIX));
        fs::create_dir_all(&half_written).unwrap();
        fs::write(half_written.join(ARTIFACT_FILE), b"partial").unwrap();

        assert_eq!(store.versions("Driver").unwrap(), vec![trained.metadata.version]);
        assert_eq!(store.load_latest("Driver").unwrap().version, trained.metadata.version);
    }

    #[test]
    fn test_latest_and_prune() {
        let (_dir, store) = store();
        let trained = train("Driver", 60);
        let mut published = Vec::new();
        for millis in [100, 200, 300, 400] {
            let mut metadata = trained.metadata.clone();
            metadata.version = ModelVersion::new(millis);
            store.save(&trained.artifact, &metadata).unwrap();
            published.push(metadata.version);
        }

        assert_eq!(store.latest("Driver").unwrap(), Some(ModelVersion::new(400)));

        let removed = store.prune("Driver", 2).unwrap();
        assert_eq!(removed, vec![ModelVersion::new(100), ModelVersion::new(200)]);
        assert_eq!(store.versions("Driver").unwrap(), published[2..].to_vec());
    }

    #[test]
    fn test_subjects_do_not_collide() {
        let (_dir, store) = store();
        let trained = train("7 Iron", 60);
        store.save(&trained.artifact, &trained.metadata).unwrap();
        assert!(store.latest("7-Iron").unwrap().is_none());
        assert!(store.latest("7 Iron").unwrap().is_some());
    }
}
